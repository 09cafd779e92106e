//! Diagnostic rendering for the driver.
//!
//! Turns a [`PicoError`] plus the original source text into a
//! caret-underlined source line:
//!
//! ```text
//! semantic error: undeclared identifier 'y'
//!  --> demo.pico:2:12
//!   |
//! 2 |     return y;
//!   |            ^
//! ```

use crate::error::PicoError;

/// Render `error` against the source it was produced from. `filename`
/// is only a label.
pub fn render(source: &str, filename: &str, error: &PicoError) -> String {
    let origin = &error.origin;
    let line_start = origin.line_start.min(source.len());
    let line_end = source[line_start..]
        .find('\n')
        .map(|offset| line_start + offset)
        .unwrap_or(source.len());
    let source_line = &source[line_start..line_end];

    let line_label = origin.loc.line.to_string();
    let gutter = " ".repeat(line_label.len());
    let caret_offset = origin.loc.start.saturating_sub(line_start);
    let caret_len = (origin.loc.end.saturating_sub(origin.loc.start)).max(1);

    format!(
        "{kind}: {message}\n\
         {gutter}--> {filename}:{line}:{col}\n\
         {gutter} |\n\
         {line_label} | {source_line}\n\
         {gutter} | {pad}{carets}\n",
        kind = error.kind,
        message = error.message,
        line = origin.loc.line,
        col = origin.loc.col,
        pad = " ".repeat(caret_offset),
        carets = "^".repeat(caret_len),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PicoError;
    use crate::token::{Location, Token, TokenTag};

    #[test]
    fn test_render_points_at_the_token() {
        let source = "fn f()int{\n    return y;\n}";
        let token = Token {
            tag: TokenTag::Id,
            value: "y".to_string(),
            loc: Location {
                line: 2,
                col: 12,
                start: 22,
                end: 23,
            },
            line_start: 11,
        };
        let error = PicoError::semantic("undeclared identifier 'y'", token);
        let rendered = render(source, "demo.pico", &error);
        assert!(rendered.contains("semantic error: undeclared identifier 'y'"));
        assert!(rendered.contains("--> demo.pico:2:12"));
        assert!(rendered.contains("2 |     return y;"));
        // caret sits under the offending identifier
        let caret_line = rendered.lines().last().unwrap();
        assert_eq!(caret_line.find('^').unwrap(), caret_line.find('|').unwrap() + 13);
    }
}
