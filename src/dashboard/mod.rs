//! Human readable status pages.
//!
//! Pure formatting over dispatcher reads: [`render_jobs_report`] draws every
//! job as a colored cell, [`render_job_report`] shows one job in detail.

use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::dispatcher::{Job, Overview};

/// Number of job cells per table row.
pub const JOB_COLUMNS: usize = 30;

/// Seconds between two reloads of the overview page.
pub const REFRESH_SECS: u32 = 5;

const CSS: &str = "<style type=\"text/css\">
table {border-collapse: collapse; padding: 5px; border: solid black 1px;}
td {border: solid black 1px; width: 20px; height: 20px; text-align: center; padding: 5px;}
td.committed {background-color: green;}
td.waiting {background-color: yellow;}
td.running {background-color: orange;}
h1 {text-align: center;}
</style>";

/// Overview of every job: committed first, then running, then waiting.
pub fn render_jobs_report(overview: &Overview) -> String {
    let counts = overview.counts();
    let mut out = String::new();

    out.push_str("<html><head>\n");
    out.push_str(CSS);
    let _ = writeln!(
        out,
        "\n<meta http-equiv=\"refresh\" content=\"{}\">",
        REFRESH_SECS
    );
    out.push_str("</head>\n<body>\n<h1>Jobs status</h1>\n");
    let _ = writeln!(
        out,
        "{} jobs: {} waitings; {} runnings; {} committed<br/>",
        counts.total(),
        counts.waiting,
        counts.running,
        counts.committed
    );

    out.push_str("<table>\n<tr>\n");
    let jobs = overview
        .committed
        .iter()
        .chain(&overview.running)
        .chain(&overview.waiting);
    for (i, job) in jobs.enumerate() {
        if i > 0 && i % JOB_COLUMNS == 0 {
            out.push_str("</tr><tr>\n");
        }
        let _ = writeln!(
            out,
            "<td class=\"{status}\"><a href=\"/?j={id}&amp;output=html\">{id}</a></td>",
            status = job.status(),
            id = job.id()
        );
    }
    out.push_str("</tr>\n</table>\n</body></html>\n");
    out
}

/// Detail page of a single job.
pub fn render_job_report(job: &Job) -> String {
    let mut out = String::new();

    out.push_str("<html><head>\n");
    out.push_str(CSS);
    out.push_str("\n</head>\n<body>\n");
    let _ = writeln!(out, "<h1>Details of job {}</h1>", job.id());

    out.push_str("<ul>\n");
    let _ = writeln!(out, "<li>status: {}</li>", job.status());
    let _ = writeln!(out, "<li>Enqueued time: {}</li>", format_time(job.enqueued_at()));
    let _ = writeln!(out, "<li>Dequeued time: {}</li>", format_time(job.dequeued_at()));
    let _ = writeln!(out, "<li>Committed time: {}</li>", format_time(job.committed_at()));
    out.push_str("</ul>\n<br/><ul>\n");
    for (k, v) in job.fields() {
        let _ = writeln!(out, "<li>{}: {}</li>", escape(k), escape(v));
    }
    out.push_str("</ul>\n<a href=\"/\">Back to jobs</a>\n</body></html>\n");
    out
}

fn format_time(t: Option<DateTime<Utc>>) -> String {
    match t {
        Some(t) => t.format("%Y/%m/%d at %H:%M:%S %Z").to_string(),
        None => "-".to_string(),
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
