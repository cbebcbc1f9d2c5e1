//! CLI output formatting

use crate::core::{Context, ErrorType, ABORT_INDEX};
use crate::execution::RunId;
use console::Emoji;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Format a stage index for display
pub fn format_stage(index: usize) -> String {
    if index >= ABORT_INDEX {
        style("STOPPED").dim().to_string()
    } else {
        style(format!("STAGE {}", index)).yellow().to_string()
    }
}

/// One-line summary of a run
pub fn format_run(run: RunId, ctx: &Context) -> String {
    let errors = ctx.errors();
    let icon = if !ctx.is_aborted() {
        SPINNER
    } else if errors.is_empty() {
        CHECK
    } else {
        CROSS
    };

    format!(
        "{} run {} {} - {} - {} params, {} errors ({} public)",
        icon,
        style(run).bold(),
        style(&ctx.run_id().to_string()[..8]).dim(),
        format_stage(ctx.index()),
        style(ctx.params().len()).cyan(),
        style(errors.len()).red(),
        errors.by_type(ErrorType::PUBLIC).len()
    )
}

/// Parameters of a run as indented `key = value` lines, sorted by key
pub fn format_params(ctx: &Context) -> String {
    let mut params: Vec<_> = ctx.params().into_iter().collect();
    params.sort_by(|a, b| a.0.cmp(&b.0));
    params
        .iter()
        .map(|(key, value)| format!("    {} = {}\n", style(key).cyan(), value))
        .collect()
}

/// Errors of a run, indented
pub fn format_errors(ctx: &Context) -> String {
    ctx.errors()
        .to_string()
        .lines()
        .map(|line| format!("    {}\n", style(line).red()))
        .collect()
}
