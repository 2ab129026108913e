use std::fmt::Write as _;

use portfolio_stream::{ItemOutcome, PortfolioAnalysis, ResultRecord, equal_weight};

/// Human-readable report of a finished analysis.
pub fn report(analysis: &PortfolioAnalysis, amount: Option<f64>) -> String {
    let summary = &analysis.summary;
    let mut out = String::new();
    if let Some(id) = &summary.request_id {
        let _ = writeln!(out, "request   {id}");
    }
    let _ = writeln!(
        out,
        "analyzed  {} ({} succeeded, {} failed)",
        summary.total_items, summary.succeeded, summary.failed
    );
    if let (Some(start), Some(end)) = (&summary.start_date, &summary.end_date) {
        let _ = writeln!(out, "window    {start} .. {end}");
    } else if let Some(date) = &summary.analysis_date {
        let _ = writeln!(out, "date      {date}");
    }
    out.push('\n');

    for record in analysis.results_by_item() {
        let _ = writeln!(out, "{}", result_line(record));
    }

    if let Some(amount) = amount {
        let tickers: Vec<&str> = analysis
            .results_by_item()
            .into_iter()
            .map(|r| r.item_id.as_str())
            .collect();
        if let Ok(allocations) = equal_weight(amount, &tickers)
            && !allocations.is_empty()
        {
            let _ = writeln!(out, "\nequal-weight split of {amount:.2}");
            for allocation in allocations {
                let _ = writeln!(
                    out,
                    "  {:<12} {:>14.2}  {:>5.1}%",
                    allocation.item_id,
                    allocation.amount,
                    allocation.weight * 100.0
                );
            }
        }
    }
    out
}

/// One line per item: ticker, status, and a short detail.
pub fn result_line(record: &ResultRecord) -> String {
    match &record.outcome {
        ItemOutcome::Success { payload } => {
            let detail = payload
                .get("raw_output")
                .or_else(|| payload.get("query"))
                .and_then(|v| v.as_str())
                .map(first_line)
                .unwrap_or_default();
            format!("  ok    {:<12} {detail}", record.item_id)
        }
        ItemOutcome::Failure { message } => {
            format!("  FAIL  {:<12} {}", record.item_id, first_line(message))
        }
    }
}

fn first_line(text: &str) -> String {
    const MAX: usize = 80;
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > MAX {
        let cut: String = line.chars().take(MAX).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}
