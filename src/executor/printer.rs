use colored::{Color, Colorize};

use crate::query::HttpMethod;

use super::models::ResponseOutcome;

pub(crate) fn status_color(status: u16) -> Color {
    if status >= 400 {
        Color::Red
    } else if status >= 300 {
        Color::Yellow
    } else {
        Color::Green
    }
}

/// Prints one response for the single-query command.
pub fn print_response(method: HttpMethod, outcome: &ResponseOutcome) {
    println!("{} {}", method.as_str().bold(), outcome.url.cyan());

    let duration = outcome
        .duration_ms
        .map(|ms| format!("({:.1} ms)", ms))
        .unwrap_or_default();
    println!(
        "{} {} {}",
        "Status:".bold(),
        format!("{}", outcome.status).color(status_color(outcome.status)),
        duration.dimmed()
    );

    println!("{}", "Body".bold());
    println!("{}", render_body(&outcome.data));
}

fn render_body(data: &serde_json::Value) -> String {
    match data {
        serde_json::Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}
