//! HTML documents that host the rendering script.
//!
//! Both builders are pure: the same diagram, options and script always yield
//! the same document. The diagram text is HTML-escaped into a container
//! element, the script is inlined, and a short init snippet renders the
//! diagram and records the outcome on `document.body.dataset`.

use crate::{
    domain::render::RenderOptions,
    infra::browser::dom::{CONTAINER_ID, ERROR_KEY, STATE_DONE, STATE_ERROR, STATE_KEY},
};

use super::script::RenderScript;

const FONT_FAMILY: &str = "Arial, sans-serif";
const ID_SEED: &str = "mermaid-gateway";

/// Document loaded into a browser page for capture.
pub fn capture_document(diagram_text: &str, options: &RenderOptions, script: &RenderScript) -> String {
    let style = format!(
        "body {{ margin: 0; padding: 20px; background-color: {background}; font-family: {FONT_FAMILY}; }}\n\
         #{CONTAINER_ID} {{ display: flex; justify-content: center; align-items: center; }}",
        background = options.background(),
    );
    assemble("", &style, diagram_text, options, script)
}

/// Standalone document returned to clients for viewing in their own browser.
pub fn viewer_document(diagram_text: &str, options: &RenderOptions, script: &RenderScript) -> String {
    let head = "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
                <title>Mermaid Diagram</title>\n";
    let style = format!(
        "html, body {{ margin: 0; min-height: 100%; }}\n\
         body {{ padding: 20px; background-color: {background}; font-family: {FONT_FAMILY}; box-sizing: border-box; }}\n\
         #{CONTAINER_ID} {{ display: flex; justify-content: center; align-items: center; \
         max-width: {width}px; min-height: {height}px; margin: 0 auto; }}",
        background = options.background(),
        width = options.width,
        height = options.height,
    );
    assemble(head, &style, diagram_text, options, script)
}

fn assemble(
    head: &str,
    style: &str,
    diagram_text: &str,
    options: &RenderOptions,
    script: &RenderScript,
) -> String {
    let mut html = String::with_capacity(script.as_str().len() + diagram_text.len() + 2048);
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str(head);
    html.push_str("<style>\n");
    html.push_str(style);
    html.push_str("\n</style>\n</head>\n<body>\n");
    html.push_str(&format!("<div id=\"{CONTAINER_ID}\">\n<pre class=\"mermaid\">"));
    html.push_str(&escape_html(diagram_text));
    html.push_str("</pre>\n</div>\n<script>\n");
    html.push_str(&escape_inline_script(script.as_str()));
    html.push_str("\n</script>\n<script>\n");
    html.push_str(&init_snippet(options));
    html.push_str("\n</script>\n</body>\n</html>\n");
    html
}

fn init_snippet(options: &RenderOptions) -> String {
    format!(
        r#"(function () {{
  var body = document.body;
  var finish = function (state, message) {{
    if (message) {{ body.dataset.{ERROR_KEY} = message; }}
    body.dataset.{STATE_KEY} = state;
  }};
  var fail = function (err) {{
    finish('{STATE_ERROR}', String((err && err.message) || err || 'diagram rendering failed'));
  }};
  var start = function () {{
    try {{
      mermaid.initialize({{
        theme: '{theme}',
        startOnLoad: false,
        securityLevel: 'loose',
        fontFamily: '{FONT_FAMILY}',
        suppressErrorRendering: true,
        deterministicIds: true,
        deterministicIDSeed: '{ID_SEED}'
      }});
      mermaid.run({{ querySelector: '#{CONTAINER_ID} .mermaid' }})
        .then(function () {{ finish('{STATE_DONE}'); }})
        .catch(fail);
    }} catch (err) {{
      fail(err);
    }}
  }};
  if (document.readyState === 'loading') {{
    document.addEventListener('DOMContentLoaded', start);
  }} else {{
    start();
  }}
}})();"#,
        theme = options.theme.as_str(),
    )
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Break up any `</script` so inlined code cannot close its own element.
fn escape_inline_script(source: &str) -> String {
    const CLOSER: &str = "</script";
    let bytes = source.as_bytes();
    let mut escaped = String::with_capacity(source.len());
    let mut last = 0;
    let mut index = 0;

    while let Some(offset) = source[index..].find("</") {
        let start = index + offset;
        let end = start + CLOSER.len();
        if end <= bytes.len() && bytes[start..end].eq_ignore_ascii_case(CLOSER.as_bytes()) {
            escaped.push_str(&source[last..start]);
            escaped.push_str("<\\/");
            last = start + 2;
        }
        index = start + 2;
    }

    escaped.push_str(&source[last..]);
    escaped
}
