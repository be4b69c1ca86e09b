//! Push notification payloads and click handling.

use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

use crate::config::NotificationConfig;

/// Body text shown when a push arrives without a payload.
pub const DEFAULT_BODY: &str = "New movies are waiting for you!";

/// Short-pause-short buzz.
pub const VIBRATION_PATTERN: [u32; 3] = [100, 50, 100];

pub const ACTION_EXPLORE: &str = "explore";
pub const ACTION_CLOSE: &str = "close";

#[derive(Debug, Clone, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

/// A notification ready for display.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub timestamp: DateTime<Utc>,
  pub actions: Vec<NotificationAction>,
}

/// Build the notification for a push payload. An absent or empty payload
/// falls back to the default body.
pub fn build_notification(payload: Option<&str>, config: &NotificationConfig) -> Notification {
  let body = match payload {
    Some(text) if !text.is_empty() => text.to_string(),
    _ => DEFAULT_BODY.to_string(),
  };

  Notification {
    title: config.title.clone(),
    body,
    icon: config.icon.clone(),
    badge: config.badge.clone(),
    vibrate: VIBRATION_PATTERN.to_vec(),
    timestamp: Utc::now(),
    actions: vec![
      NotificationAction {
        action: ACTION_EXPLORE.to_string(),
        title: "Go to the app".to_string(),
      },
      NotificationAction {
        action: ACTION_CLOSE.to_string(),
        title: "Close".to_string(),
      },
    ],
  }
}

/// What a notification click should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  OpenApp(Url),
  Dismiss,
}

/// The explore action opens the app's root page; every other action only
/// dismisses the notification.
pub fn resolve_click(action: &str, origin: &Url) -> ClickOutcome {
  if action == ACTION_EXPLORE {
    let mut target = origin.clone();
    target.set_path("/");
    target.set_query(None);
    target.set_fragment(None);
    ClickOutcome::OpenApp(target)
  } else {
    ClickOutcome::Dismiss
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config() -> NotificationConfig {
    NotificationConfig::default()
  }

  #[test]
  fn test_payload_text_becomes_body() {
    let notification = build_notification(Some("The Matrix is back in your region"), &config());
    assert_eq!(notification.body, "The Matrix is back in your region");
  }

  #[test]
  fn test_missing_or_empty_payload_uses_default_body() {
    assert_eq!(build_notification(None, &config()).body, DEFAULT_BODY);
    assert_eq!(build_notification(Some(""), &config()).body, DEFAULT_BODY);
  }

  #[test]
  fn test_notification_carries_fixed_vibration_and_actions() {
    let notification = build_notification(None, &config());
    assert_eq!(notification.vibrate, vec![100, 50, 100]);

    let actions: Vec<&str> = notification.actions.iter().map(|a| a.action.as_str()).collect();
    assert_eq!(actions, vec![ACTION_EXPLORE, ACTION_CLOSE]);
  }

  #[test]
  fn test_explore_click_opens_app_root() {
    let origin = Url::parse("http://localhost:3000/movies/603?tab=reviews").unwrap();
    match resolve_click(ACTION_EXPLORE, &origin) {
      ClickOutcome::OpenApp(url) => assert_eq!(url.as_str(), "http://localhost:3000/"),
      other => panic!("expected OpenApp, got {:?}", other),
    }
  }

  #[test]
  fn test_other_actions_dismiss() {
    let origin = Url::parse("http://localhost:3000").unwrap();
    assert_eq!(resolve_click(ACTION_CLOSE, &origin), ClickOutcome::Dismiss);
    assert_eq!(resolve_click("unknown", &origin), ClickOutcome::Dismiss);
  }
}
