//! HTML page for `response_mode=form_post`.
//!
//! The page re-posts the authcode response to the client's redirect URI via
//! an auto-submitted form. Because some command-line clients cannot receive
//! the post (their local listener is gone), the page also reveals the code
//! for manual copy/paste after a short delay. The inline script and style
//! are static so the Content-Security-Policy can allow exactly them by
//! SHA-256 hash and nothing else.

use std::sync::LazyLock;

use base64::{Engine, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};
use url::Url;

const SCRIPT: &str = r#"
      window.onload = () => {
        document.getElementById('automatic-post-form').submit();
        setTimeout(() => {
          document.getElementById('manual-instructions').hidden = false;
        }, 2000);
      };
      document.addEventListener('click', (event) => {
        if (event.target.id === 'copy-button') {
          navigator.clipboard.writeText(document.getElementById('manual-auth-code').innerText);
        }
      });
    "#;

const STYLE: &str = r#"
      body { font-family: sans-serif; margin: 2em; }
      #manual-instructions { margin-top: 2em; }
      code { padding: 0.3em; background: #eee; }
    "#;

/// CSP for the form_post page: only the embedded script and style may run.
pub static CONTENT_SECURITY_POLICY: LazyLock<String> = LazyLock::new(|| {
    format!(
        "default-src 'none'; script-src '{}'; style-src '{}'; frame-ancestors 'none'",
        csp_hash(SCRIPT),
        csp_hash(STYLE),
    )
});

fn csp_hash(source: &str) -> String {
    format!("sha256-{}", STANDARD.encode(Sha256::digest(source.as_bytes())))
}

/// Render the auto-posting response page.
pub fn render(redirect_uri: &Url, code: &str, scope: &str, state: &str) -> String {
    let action = html_escape(redirect_uri.as_str());
    let code = html_escape(code);
    let scope = html_escape(scope);
    let state = html_escape(state);

    format!(
        r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="UTF-8">
    <title>Logging in...</title>
    <style>{STYLE}</style>
    <script>{SCRIPT}</script>
  </head>
  <body>
    <noscript>JavaScript is disabled, so the authorization code could not be delivered automatically. Use the manual code below.</noscript>
    <form id="automatic-post-form" method="post" action="{action}">
      <input type="hidden" name="code" value="{code}">
      <input type="hidden" name="scope" value="{scope}">
      <input type="hidden" name="state" value="{state}">
    </form>
    <div id="manual-instructions" hidden>
      <p>To finish logging in, paste this authorization code into your command-line session:</p>
      <form>
        <code id="manual-auth-code">{code}</code>
        <button id="copy-button" type="button">Copy</button>
      </form>
    </div>
  </body>
</html>
"#
    )
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
