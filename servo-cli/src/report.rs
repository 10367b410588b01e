use ariadne::{Color, Label, Report, ReportKind, Source};
use servo::ServoError;
use std::io::Write;
use std::ops::Range;

/// Converts a byte span to a character span for ariadne
fn byte_to_char_span(source: &str, byte_span: &Range<usize>) -> Range<usize> {
    let start = source[..byte_span.start.min(source.len())].chars().count();
    let end = source[..byte_span.end.min(source.len())].chars().count();
    start..end
}

/// Renders a ServoError with ariadne. The report header is the error's own
/// `[line N] Error ...` line; the label points at the offending token.
pub fn report_error<W: Write>(
    error: &ServoError,
    source: &str,
    filename: Option<&str>,
    mut writer: W,
) {
    let name = filename.unwrap_or("");

    let Some(span) = error.span() else {
        writeln!(writer, "{}", error).ok();
        return;
    };

    let char_span = byte_to_char_span(source, &span);
    Report::build(ReportKind::Error, (name, char_span.clone()))
        .with_message(error.to_string())
        .with_label(
            Label::new((name, char_span))
                .with_message(error.message())
                .with_color(Color::Red),
        )
        .finish()
        .write((name, Source::from(source)), &mut writer)
        .ok();
}
