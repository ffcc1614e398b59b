//! Where the active dataset came from.

use chrono::TimeDelta;

/// Origin and freshness of the currently active dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Provenance {
  /// Fresh data from the network
  Live,
  /// Network failed; serving the local snapshot. `age` is `None` when the
  /// snapshot's capture time was never recorded.
  Cached { age: Option<TimeDelta> },
  /// Nothing could be loaded
  #[default]
  Unavailable,
}

impl Provenance {
  pub fn is_live(&self) -> bool {
    matches!(self, Provenance::Live)
  }

  /// Status line shown to the user. Each state reads differently so an
  /// offline copy is never mistaken for a hard failure.
  pub fn status_line(&self) -> String {
    match self {
      Provenance::Live => "Ready".to_string(),
      Provenance::Cached { age: Some(age) } => format!("Offline (cache {})", format_age(*age)),
      Provenance::Cached { age: None } => "Offline (cache)".to_string(),
      Provenance::Unavailable => "Offline, no data available".to_string(),
    }
  }
}

/// Coarse human age: seconds, then minutes, hours, days.
pub fn format_age(age: TimeDelta) -> String {
  let minutes = age.num_minutes().max(0);
  if minutes < 1 {
    return "a few seconds ago".to_string();
  }
  if minutes < 60 {
    return format!("{} min ago", minutes);
  }
  let hours = minutes / 60;
  if hours < 24 {
    return format!("{} h ago", hours);
  }
  format!("{} d ago", hours / 24)
}
