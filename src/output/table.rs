use chrono::{DateTime, Utc};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::db::models::{EmailWithSender, Thread};
use crate::db::{DatabaseStats, ThreadView};
use crate::output::AccountSummary;
use crate::trigger::SyncOutcome;

const FROM_WIDTH: usize = 24;
const SUBJECT_WIDTH: usize = 48;
const DATE_WIDTH: usize = 12;
const COUNT_WIDTH: usize = 5;

pub fn format_threads(threads: &[ThreadView]) -> String {
    if threads.is_empty() {
        return "No threads found.".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:<from$}  {:<subject$}  {:<date$}  {:>count$}\n",
        "From",
        "Subject",
        "Date",
        "Msgs",
        from = FROM_WIDTH,
        subject = SUBJECT_WIDTH,
        date = DATE_WIDTH,
        count = COUNT_WIDTH
    ));
    out.push_str(&format!(
        "{}  {}  {}  {}\n",
        "-".repeat(FROM_WIDTH),
        "-".repeat(SUBJECT_WIDTH),
        "-".repeat(DATE_WIDTH),
        "-".repeat(COUNT_WIDTH)
    ));

    for view in threads {
        let from = view
            .emails
            .last()
            .map(sender_label)
            .unwrap_or_else(|| "(unknown)".to_string());

        out.push_str(&format!(
            "{:<from$}  {:<subject$}  {:<date$}  {:>count$}\n",
            pad_for_width(&truncate_for_width(&from, FROM_WIDTH), FROM_WIDTH),
            pad_for_width(
                &truncate_for_width(subject_or_placeholder(&view.thread.subject), SUBJECT_WIDTH),
                SUBJECT_WIDTH
            ),
            truncate_for_width(&relative_date(&view.thread.last_message_date), DATE_WIDTH),
            view.emails.len(),
            from = FROM_WIDTH,
            subject = SUBJECT_WIDTH,
            date = DATE_WIDTH,
            count = COUNT_WIDTH
        ));
    }

    out
}

pub fn format_thread(view: &ThreadView) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Thread: {}\n",
        subject_or_placeholder(&view.thread.subject)
    ));
    out.push_str(&format!("ID: {}\n", view.thread.id));
    out.push_str(&format!(
        "Folder: {}{}\n",
        view.thread
            .folder()
            .map(|folder| folder.to_string())
            .unwrap_or_else(|| "(mixed)".to_string()),
        if view.thread.done { " (done)" } else { "" }
    ));

    if view.emails.is_empty() {
        out.push_str("\nThread has no messages.\n");
        return out;
    }

    for entry in &view.emails {
        out.push('\n');
        out.push_str(&"-".repeat(80));
        out.push('\n');
        out.push_str(&format!("From: {}\n", sender_label(entry)));
        out.push_str(&format!(
            "Date: {} ({})\n",
            entry.email.sent_at,
            relative_date(&entry.email.sent_at)
        ));
        out.push_str(&format!("Label: {}\n", entry.email.email_label));
        out.push('\n');
        out.push_str(
            entry
                .email
                .body_snippet
                .as_deref()
                .or(entry.email.body.as_deref())
                .unwrap_or("(empty)"),
        );
        out.push('\n');
    }
    out
}

pub fn format_search_results(threads: &[Thread]) -> String {
    if threads.is_empty() {
        return "No threads found.".to_string();
    }

    let mut out = String::new();
    out.push_str("Thread ID                 Subject                                           Date\n");
    out.push_str("------------------------  ------------------------------------------------  ------------\n");
    for thread in threads {
        out.push_str(&format!(
            "{:<24}  {}  {}\n",
            truncate_for_width(&thread.id, 24),
            pad_for_width(
                &truncate_for_width(subject_or_placeholder(&thread.subject), SUBJECT_WIDTH),
                SUBJECT_WIDTH
            ),
            relative_date(&thread.last_message_date)
        ));
    }
    out
}

pub fn format_accounts(accounts: &[AccountSummary]) -> String {
    if accounts.is_empty() {
        return "No accounts configured.".to_string();
    }

    let mut out = String::new();
    for account in accounts {
        let sync_state = match (&account.last_sync, account.sync_initialized) {
            (Some(last_sync), _) => format!("last sync {}", relative_date(last_sync)),
            (None, true) => "initialized".to_string(),
            (None, false) => "never synced".to_string(),
        };
        out.push_str(&format!(
            "{} ({}) user={} [{}]\n",
            account.email_address, account.id, account.user_id, sync_state
        ));
    }
    out
}

pub fn format_sync_outcome(outcome: &SyncOutcome) -> String {
    let report = &outcome.report;
    let mut out = format!(
        "Synced account {}: {} fetched, {} added, {} updated, {} failed\n",
        outcome.account_id,
        outcome.records_fetched,
        report.emails_added,
        report.emails_updated,
        report.errors.len()
    );
    for failure in &report.errors {
        out.push_str(&format!("  {}: {}\n", failure.message_id, failure.reason));
    }
    out
}

pub fn format_stats(stats: &DatabaseStats) -> String {
    let mut out = String::new();
    out.push_str("Mailbox Stats\n");
    out.push_str("=============\n");
    out.push_str(&format!("Accounts:    {}\n", stats.total_accounts));
    out.push_str(&format!("Threads:     {}\n", stats.total_threads));
    out.push_str(&format!("Emails:      {}\n", stats.total_emails));
    out.push_str(&format!("Addresses:   {}\n", stats.total_addresses));
    out.push_str(&format!("Attachments: {}\n", stats.total_attachments));

    if !stats.threads_by_account.is_empty() {
        out.push('\n');
        out.push_str("Threads by account\n");
        out.push_str("------------------\n");
        for row in &stats.threads_by_account {
            out.push_str(&format!("{:<24} {:>8}\n", row.account_id, row.count));
        }
    }

    out
}

fn sender_label(entry: &EmailWithSender) -> String {
    match &entry.from.name {
        Some(name) => name.clone(),
        None => entry.from.address.clone(),
    }
}

fn subject_or_placeholder(subject: &str) -> &str {
    if subject.trim().is_empty() {
        "(no subject)"
    } else {
        subject
    }
}

fn relative_date(input: &str) -> String {
    let parsed = match DateTime::parse_from_rfc3339(input) {
        Ok(value) => value.with_timezone(&Utc),
        Err(_) => return input.to_string(),
    };

    let now = Utc::now();
    let delta = now.signed_duration_since(parsed);
    if delta.num_seconds() < 0 {
        return "in future".to_string();
    }
    if delta.num_minutes() < 1 {
        return "just now".to_string();
    }
    if delta.num_hours() < 1 {
        return format!("{}m ago", delta.num_minutes());
    }
    if delta.num_hours() < 24 {
        return format!("{}h ago", delta.num_hours());
    }
    if delta.num_days() == 1 {
        return "yesterday".to_string();
    }
    if delta.num_days() < 7 {
        return format!("{}d ago", delta.num_days());
    }
    parsed.format("%Y-%m-%d").to_string()
}

fn truncate_for_width(value: &str, max_width: usize) -> String {
    if UnicodeWidthStr::width(value) <= max_width {
        return value.to_string();
    }

    if max_width <= 1 {
        return "…".to_string();
    }

    let mut out = String::new();
    let mut width = 0usize;
    for c in value.chars() {
        let cw = UnicodeWidthChar::width(c).unwrap_or(0);
        if width + cw + 1 > max_width {
            break;
        }
        out.push(c);
        width += cw;
    }
    out.push('…');
    out
}

/// `format!` pads by char count, which misaligns wide glyphs.
fn pad_for_width(value: &str, width: usize) -> String {
    let current = UnicodeWidthStr::width(value);
    if current >= width {
        return value.to_string();
    }
    format!("{value}{}", " ".repeat(width - current))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::db::models::{Email, EmailAddress, EmailWithSender, FolderLabel, Thread};
    use crate::db::ThreadView;

    use super::{format_thread, format_threads, relative_date, truncate_for_width};

    fn sample_view() -> ThreadView {
        let sent_at = (Utc::now() - Duration::hours(2)).to_rfc3339();
        ThreadView {
            thread: Thread {
                id: "thread-1".to_string(),
                account_id: "acc-1".to_string(),
                subject: "A very long subject line that should be truncated in table output because it exceeds width".to_string(),
                last_message_date: sent_at.clone(),
                inbox_status: true,
                sent_status: false,
                draft_status: false,
                done: false,
                participant_ids: vec!["addr-1".to_string()],
            },
            emails: vec![EmailWithSender {
                email: Email {
                    id: "msg-1".to_string(),
                    thread_id: "thread-1".to_string(),
                    created_time: sent_at.clone(),
                    last_modified_time: sent_at.clone(),
                    sent_at: sent_at.clone(),
                    received_at: sent_at,
                    internet_message_id: None,
                    subject: "Hello".to_string(),
                    body: Some("<p>Body</p>".to_string()),
                    body_snippet: Some("Body".to_string()),
                    email_label: FolderLabel::Inbox,
                    sys_labels: vec!["inbox".to_string()],
                    keywords: vec![],
                    sys_classifications: vec![],
                    sensitivity: None,
                    meeting_message_method: None,
                    has_attachments: false,
                    in_reply_to: None,
                    references: None,
                    thread_index: None,
                    internet_headers: None,
                    native_properties: None,
                    folder_id: None,
                    omitted: vec![],
                    from_id: "addr-1".to_string(),
                },
                from: EmailAddress {
                    id: "addr-1".to_string(),
                    account_id: "acc-1".to_string(),
                    address: "sender@example.com".to_string(),
                    name: Some("Sender Name".to_string()),
                    raw: None,
                },
            }],
        }
    }

    #[test]
    fn thread_list_has_headers_and_truncates() {
        let rendered = format_threads(&[sample_view()]);
        assert!(rendered.contains("From"));
        assert!(rendered.contains("Subject"));
        assert!(rendered.contains("Sender Name"));
        assert!(rendered.contains('…'));
        assert!(rendered.contains("2h ago"));
    }

    #[test]
    fn thread_detail_shows_each_message() {
        let rendered = format_thread(&sample_view());
        assert!(rendered.contains("Folder: inbox"));
        assert!(rendered.contains("From: Sender Name"));
        assert!(rendered.contains("Body"));
    }

    #[test]
    fn unparseable_dates_pass_through() {
        assert_eq!(relative_date("yesterday-ish"), "yesterday-ish");
        assert_eq!(truncate_for_width("abcdef", 4), "abc…");
    }
}
