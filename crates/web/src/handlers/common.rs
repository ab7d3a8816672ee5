use std::time::{Duration, Instant};

use axum::{
    extract::FromRequestParts,
    http::{HeaderValue, StatusCode, request::Parts},
    response::{IntoResponseParts, ResponseParts},
};
use maud::{DOCTYPE, Markup, PreEscaped, html};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, macros::format_description};
use tower_sessions::Session;
use tracker_auth::CurrentUser;

const MESSAGE_KEY: &str = "message";

const STYLE: &str = r#"
:root{--fg:#1f2328;--muted:#656d76;--border:#d0d7de;--accent:#0969da;--bg-alt:#f6f8fa}
*{box-sizing:border-box}
body{font-family:-apple-system,BlinkMacSystemFont,"Segoe UI",Roboto,Helvetica,Arial,sans-serif;color:var(--fg);margin:0}
header nav,main,footer{max-width:1100px;margin:0 auto;padding:0 1rem}
header{border-bottom:1px solid var(--border);background:var(--bg-alt)}
header nav{display:flex;justify-content:space-between;align-items:center;height:3.5rem}
nav ul{display:flex;gap:1.25rem;list-style:none;margin:0;padding:0}
a{color:var(--accent);text-decoration:none}
main{padding-top:1.5rem;padding-bottom:2rem}
footer{border-top:1px solid var(--border);padding-top:.75rem;display:flex;justify-content:space-between;flex-wrap:wrap}
.muted{color:var(--muted)}
article{border:1px solid var(--border);border-radius:6px;padding:1rem;margin-bottom:1rem}
.info-card{border-color:#1a7f37;background:#dafbe1}
.error-card{border-color:#cf222e;background:#ffebe9}
.warning-card{border-color:#9a6700;background:#fff8c5}
label{display:block;margin-bottom:.75rem;font-weight:600}
label small{display:block;font-weight:400;color:var(--muted)}
input:not([type=checkbox]):not([type=radio]),select,textarea{display:block;width:100%;padding:.4rem;margin-top:.25rem;border:1px solid var(--border);border-radius:4px;font:inherit}
textarea{min-height:6rem}
button,.button{display:inline-block;padding:.4rem .9rem;border:1px solid var(--accent);border-radius:4px;background:var(--accent);color:#fff;cursor:pointer;font:inherit}
button.secondary,.button.secondary{background:#fff;color:var(--accent)}
button.danger{background:#cf222e;border-color:#cf222e}
.grid{display:grid;grid-template-columns:repeat(auto-fit,minmax(14rem,1fr));gap:1rem}
.inline{display:inline}
table{border-collapse:collapse;width:100%}
th,td{border-bottom:1px solid var(--border);padding:.4rem .5rem;text-align:left}
progress{width:100%;height:1.25rem}
.status-completed{color:#1a7f37}
.status-failed,.status-cancelled{color:#cf222e}
"#;

/// A one-shot notice shown on the next rendered page.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum Message {
    #[default]
    None,
    Info(String),
    Error(String),
}

pub async fn flash(session: &Session, message: Message) {
    if let Err(e) = session.insert(MESSAGE_KEY, message).await {
        tracing::error!("Failed to store message: {}", e);
    }
}

pub fn render_message(message: &Message) -> Markup {
    match message {
        Message::None => Markup::default(),
        Message::Info(msg) => html! {
            article.info-card { (msg) }
        },
        Message::Error(msg) => html! {
            article.error-card { (msg) }
        },
    }
}

/// Per-request page state: render timing and any pending message.
pub struct TemplateContext {
    start: Instant,
    pub message: Message,
}

impl<S> FromRequestParts<S> for TemplateContext
where S: Send + Sync
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let start = Instant::now();
        let session = Session::from_request_parts(parts, state).await?;
        let message = match session.get::<Message>(MESSAGE_KEY).await {
            Ok(Some(message)) => {
                if let Err(e) = session.remove::<Message>(MESSAGE_KEY).await {
                    tracing::error!("Failed to clear message: {}", e);
                }
                message
            }
            Ok(None) => Message::None,
            Err(e) => {
                tracing::warn!("Failed to read message: {}", e);
                Message::None
            }
        };
        Ok(Self { start, message })
    }
}

impl IntoResponseParts for TemplateContext {
    type Error = (StatusCode, String);

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        let timing = format!("render;dur={}", self.start.elapsed().as_millis());
        if let Ok(value) = HeaderValue::from_str(&timing) {
            res.headers_mut().insert("server-timing", value);
        }
        Ok(res)
    }
}

impl TemplateContext {
    /// Full page with the shared header, navigation and footer.
    pub fn page(
        &self,
        title: &str,
        current_user: Option<&CurrentUser>,
        content: Markup,
    ) -> Markup {
        html! {
            (DOCTYPE)
            html lang="en" {
                head {
                    meta charset="utf-8";
                    meta name="viewport" content="width=device-width, initial-scale=1.0";
                    title { (title) " • GitHub Activity Tracker" }
                    style { (PreEscaped(STYLE)) }
                }
                body {
                    header {
                        nav {
                            ul {
                                li {
                                    a href="/" { strong { "GitHub Activity Tracker" } }
                                }
                                @if current_user.is_some() {
                                    li { a href="/" { "New job" } }
                                    li { a href="/jobs" { "Jobs" } }
                                }
                                @if current_user.is_some_and(|u| u.is_admin) {
                                    li { a href="/admin/users" { "Users" } }
                                }
                            }
                        }
                    }
                    main {
                        (render_message(&self.message))
                        (content)
                    }
                    (self.footer(current_user))
                }
            }
        }
    }

    fn footer(&self, current_user: Option<&CurrentUser>) -> Markup {
        let elapsed = self.start.elapsed();
        html! {
            footer {
                small class="muted" { "Generated in " (elapsed.as_millis()) "ms" }
                @if let Some(user) = current_user {
                    span {
                        small class="muted" {
                            "Logged in as " strong { (user.username) }
                            " | "
                            a href="/account/password" { "Change password" }
                            " | "
                        }
                        form action="/logout" method="post" class="inline" {
                            button type="submit" class="secondary" { "Logout" }
                        }
                    }
                } @else {
                    small class="muted" { a href="/login" { "Login" } }
                }
            }
        }
    }
}

pub fn timeago(value: OffsetDateTime) -> String {
    let Ok(duration) = Duration::try_from(OffsetDateTime::now_utc() - value) else {
        return "[out of range]".to_string();
    };
    timeago::Formatter::new().convert(duration)
}

pub fn date(value: OffsetDateTime) -> String {
    value
        .format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second] UTC"))
        .unwrap_or_else(|_| "[invalid]".to_string())
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn test_date() {
        assert_eq!(date(datetime!(2025-03-08 12:30:05 UTC)), "2025-03-08 12:30:05 UTC");
    }

    #[test]
    fn test_timeago() {
        let value = OffsetDateTime::now_utc() - time::Duration::minutes(5);
        assert_eq!(timeago(value), "5 minutes ago");
        assert_eq!(timeago(OffsetDateTime::now_utc() + time::Duration::hours(1)), "[out of range]");
    }

    #[test]
    fn test_render_message() {
        assert!(render_message(&Message::None).into_string().is_empty());
        let error = render_message(&Message::Error("<bad>".to_string())).into_string();
        assert!(error.contains("error-card"));
        assert!(error.contains("&lt;bad&gt;"));
    }
}
