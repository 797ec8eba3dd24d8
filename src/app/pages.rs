//! Built-in fallback pages.

use crate::security::escape_html;

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Body of a 404 outside debug mode.
pub const NOT_FOUND_TEXT: &str = "Page not found";

/// Body of a failed dispatch outside debug mode.
pub const ERROR_TEXT: &str = "Runtime error";

const STYLE: &str = "\
    html, body { margin: 0; padding: 0; color: #333; }
    main { margin: 0; padding: 15px; }
    main > h1 { color: #85a038; font-weight: bold; padding: 0 0 15px 0; margin: 0 0 15px 0; border-bottom: solid 1px #666; }
    main > pre { font-family: 'Courier New', Courier, monospace; background-color: #eee; padding: 15px; border-radius: 5px; }";

fn page(title: &str, content: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n  <meta charset=\"UTF-8\">\n  \
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n  \
         <title>{title}</title>\n  <style>\n{STYLE}\n  </style>\n</head>\n<body>\n  <main>\n    \
         <h1>{title}</h1>\n{content}  </main>\n</body>\n</html>\n"
    )
}

/// Debug 404 page showing the requested URL.
pub fn not_found(url: &str) -> String {
    page(
        "Page not found",
        &format!("    <p><b>URL:</b></p>\n    <pre>{}</pre>\n", escape_html(url)),
    )
}

/// Debug error page with the message and its chain of causes.
pub fn error(message: &str, causes: &[String]) -> String {
    let causes = if causes.is_empty() {
        "No further details available".to_owned()
    } else {
        causes.join("\n")
    };
    page(
        "Runtime error",
        &format!(
            "    <p><b>Message:</b> {}</p>\n    <p><b>Caused by:</b></p>\n    <pre>{}</pre>\n",
            escape_html(message),
            escape_html(&causes)
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_escape_their_input() {
        let page = not_found("/<x>");
        assert!(page.contains("<pre>/&lt;x&gt;</pre>"));
        assert!(page.starts_with("<!DOCTYPE html>"));

        let page = error("bad \"thing\"", &["io: <eof>".to_owned()]);
        assert!(page.contains("bad &quot;thing&quot;"));
        assert!(page.contains("io: &lt;eof&gt;"));
        assert!(error("x", &[]).contains("No further details available"));
    }
}
