//! Result summaries for the console and per-query output files.

use chrono::Duration;
use colored::Colorize;

use crate::engine::RunStats;
use crate::parse::ParsedQuery;

const DELIMITER: &str =
    "--------------------------------------------------------------------";

/// `h:mm:ss` rendering for estimate and runtime lines.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    format!(
        "{}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

fn percent(part: u64, whole: u64) -> String {
    if whole == 0 {
        "0%".to_string()
    } else {
        format!("{:.0}%", part as f64 * 100.0 / whole as f64)
    }
}

/// Render the summary for one evaluated query. `color` is for the
/// console; output files always get the plain form.
pub fn render(query: &ParsedQuery, simulate: bool, stats: &RunStats, color: bool) -> String {
    let accent = |s: String| {
        if color {
            s.as_str().cyan().bold().to_string()
        } else {
            s
        }
    };
    let number = |s: String| {
        if color {
            s.as_str().green().to_string()
        } else {
            s
        }
    };

    let mut out = String::new();
    out.push_str(DELIMITER);
    out.push('\n');

    let mode = if simulate {
        " in simulation mode (results come from the cache)"
    } else {
        ""
    };
    out.push_str(&accent(format!(
        "Results for query {}{}\n",
        query.name, mode
    )));

    out.push_str(&format!(
        "\n    Results amount: {}\n",
        number(stats.result.to_string())
    ));

    out.push_str(&format!(
        "\n    Sub-queries total: {}\n",
        stats.subqueries_total
    ));
    let from_cache = stats.subqueries_total - stats.issued;
    if from_cache > 0 {
        out.push_str(&format!(
            "        From cache:    {} ({} of total)\n",
            from_cache,
            percent(from_cache, stats.subqueries_total)
        ));
    }
    if stats.issued > 0 {
        let label = if simulate { "To be issued:" } else { "Issued:" };
        out.push_str(&format!(
            "        {:<14} {} ({} of total)\n",
            label,
            stats.issued,
            percent(stats.issued, stats.subqueries_total)
        ));
        let with_error = stats.issued - stats.issued_ok;
        if stats.issued_ok > 0 && with_error > 0 {
            out.push_str(&format!(
                "            Without error: {} ({} of issued)\n",
                stats.issued_ok,
                percent(stats.issued_ok, stats.issued)
            ));
        }
        if with_error > 0 {
            out.push_str(&format!(
                "            With error:    {} ({} of issued)\n",
                with_error,
                percent(with_error, stats.issued)
            ));
            if stats.errors_positive > 0 {
                out.push_str(&format!(
                    "                To be added:      {}\n",
                    stats.errors_positive
                ));
            }
            if stats.errors_negative > 0 {
                out.push_str(&format!(
                    "                To be subtracted: {}\n",
                    stats.errors_negative
                ));
            }
            let difference = stats.errors_positive as i64 - stats.errors_negative as i64;
            if difference != 0 {
                out.push_str(&format!(
                    "                Difference:       {difference}\n"
                ));
            }
        }
    }

    let location = if simulate { "Local" } else { "Server" };
    out.push_str(&format!(
        "\n    {location} begin datetime: {}\n    {location} end datetime:   {}\n",
        stats.begin, stats.end
    ));
    out.push_str(&format!(
        "\n    Runtime:                           {}\n",
        format_duration(stats.end - stats.begin)
    ));
    out.push_str(&format!(
        "    Estimated runtime with caching:    from {} to {}\n",
        format_duration(stats.estimated_cached_min),
        format_duration(stats.estimated_cached_max)
    ));
    out.push_str(&format!(
        "    Estimated runtime without caching: from {} to {}\n",
        format_duration(stats.estimated_min),
        format_duration(stats.estimated_max)
    ));

    out.push_str(&format!(
        "\n    The processed query was:\n        {}\n",
        query.source
    ));

    let atoms = stats
        .longest_subquery
        .split_whitespace()
        .filter(|w| *w != "NOT")
        .count();
    out.push_str(&format!(
        "\n    Longest sub-query ({} atoms, {} characters):\n        {}\n",
        atoms,
        stats.longest_subquery.chars().count(),
        stats.longest_subquery
    ));

    out.push_str(DELIMITER);
    out.push('\n');
    out
}
