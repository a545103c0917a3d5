//! Overlay stylesheet generation.
//!
//! The overlay page marks every voice entry with a `data-reactid` that
//! contains the participant's id. Rules scoped with an attribute-contains
//! selector swap in the configured avatars; the un-scoped default rules
//! cover everyone else.

use crate::participant::Participant;

/// Speaking-state effect block placed after the base stylesheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Animation {
    /// Idle avatars dimmed, speaking avatar at full brightness.
    Dim,
    /// Dimmed idle avatars plus a short hop while speaking.
    Bounce,
    /// Dimmed and slightly shrunk while idle.
    #[default]
    Scale,
}

impl Animation {
    pub fn css(self) -> &'static str {
        match self {
            Animation::Dim => {
                r#"
  .avatar {
    filter: brightness(50%);
    transition: filter 250ms;
  }
  .speaking {
    filter: brightness(100%);
  }
"#
            }
            Animation::Bounce => {
                r#"
  .avatar {
    filter: brightness(50%);
    transition: filter 250ms;
  }
  .speaking {
    filter: brightness(100%);
    animation-name: speaking-animation;
    animation-duration: 1.5s;
    animation-fill-mode: forwards;
    animation-iteration-count: infinite;
  }
  @keyframes speaking-animation {
    0% { bottom: 0px; }
    15% { bottom: 10px; }
    30% { bottom: 0px; }
  }
"#
            }
            Animation::Scale => {
                r#"
  .avatar {
    filter: brightness(50%);
    transform: scale(0.95);
    transition: filter 250ms, transform 250ms;
  }
  .speaking {
    transform: scale(1);
    filter: brightness(100%);
  }
"#
            }
        }
    }
}

/// Build the single-line overlay stylesheet with the default animation.
///
/// Order: base stylesheet, animation block, default participant rules
/// (only when present), then one block per participant in list order.
pub fn derive_css(
    base_css: &str,
    default_participant: Option<&Participant>,
    participants: &[Participant],
) -> String {
    derive_css_with(base_css, Animation::default(), default_participant, participants)
}

pub fn derive_css_with(
    base_css: &str,
    animation: Animation,
    default_participant: Option<&Participant>,
    participants: &[Participant],
) -> String {
    let mut s = String::with_capacity(base_css.len() + 512 + participants.len() * 320);
    s.push_str(base_css);
    s.push_str(animation.css());
    if let Some(p) = default_participant {
        s.push_str(&avatar_block("", p));
    }
    for p in participants {
        let id = p.id.as_deref().unwrap_or_default();
        let scope = format!("[data-reactid*=\"{}\"]", escape_attr(id));
        s.push_str(&avatar_block(&scope, p));
    }
    normalize_whitespace(&s)
}

fn avatar_block(scope: &str, p: &Participant) -> String {
    format!(
        r#"
  .voice-state{scope} {{
    display: flex !important;
    margin-right: 6px !important;
  }}
  .avatar{scope} {{
    content: url({url});
  }}
  .speaking{scope} {{
    content: url({url_speaking}) !important;
  }}
"#,
        url = p.url,
        url_speaking = p.url_speaking,
    )
}

fn escape_attr(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Collapse the stylesheet onto one line.
///
/// Line breaks become spaces and any run of two or more whitespace
/// characters becomes a single space. Applying it twice changes nothing.
pub fn normalize_whitespace(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut run = String::new();
    for c in css.chars() {
        if c.is_whitespace() {
            run.push(c);
            continue;
        }
        flush_run(&mut out, &mut run);
        out.push(c);
    }
    flush_run(&mut out, &mut run);
    out
}

fn flush_run(out: &mut String, run: &mut String) {
    let mut chars = run.chars();
    match (chars.next(), chars.next()) {
        (None, _) => {}
        (Some('\n' | '\r'), None) => out.push(' '),
        (Some(c), None) => out.push(c),
        (Some(_), Some(_)) => out.push(' '),
    }
    run.clear();
}
