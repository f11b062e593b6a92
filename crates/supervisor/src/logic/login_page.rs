//! HTML login form for directory upstreams.
//!
//! The form posts the end user's credentials to the login endpoint together
//! with the encoded state minted when the flow started; the state rides in a
//! hidden field so a retry after a failed attempt needs no re-mint.

pub const ERR_PARAM: &str = "err";
pub const LOGIN_ERROR_BAD_CREDENTIALS: &str = "login_error";
pub const LOGIN_ERROR_INTERNAL: &str = "internal_error";

/// Render the login form. `error` is the `err` query value of a retry
/// redirect; unknown values render no banner.
pub fn render_login_form(post_url: &str, encoded_state: &str, error: Option<&str>) -> String {
    let banner = match error {
        Some(LOGIN_ERROR_BAD_CREDENTIALS) => {
            r#"    <p class="alert">Incorrect username or password.</p>
"#
        }
        Some(LOGIN_ERROR_INTERNAL) => {
            r#"    <p class="alert">An internal error occurred. Please contact your administrator for help.</p>
"#
        }
        _ => "",
    };

    let post_url = html_escape(post_url);
    let encoded_state = html_escape(encoded_state);

    format!(
        r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="UTF-8">
    <title>Log in</title>
    <style>
      body {{ font-family: sans-serif; margin: 2em; }}
      .alert {{ color: #b00; }}
      label {{ display: block; margin-top: 1em; }}
    </style>
  </head>
  <body>
{banner}    <form method="post" action="{post_url}">
      <input type="hidden" name="state" value="{encoded_state}">
      <label>Username
        <input type="text" name="username" autocomplete="username" autofocus>
      </label>
      <label>Password
        <input type="password" name="password" autocomplete="current-password">
      </label>
      <button type="submit">Log in</button>
    </form>
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
