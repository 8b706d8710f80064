// User-facing notifications about relationships the engine changed.
//
// Messages come from templates with positional placeholders:
//   %1  type name of the related record, e.g. "collection"
//   %2  display name of the related record
// Notifications are advisory. A sink failure is logged and never reaches
// the caller.

use std::fmt;
use std::sync::Arc;
use log::error;

use crate::host::{NotificationSink, ResolvedRecord, Severity};

/// Template used when neither the rule nor the configuration sets one.
pub const DEFAULT_ADD_NOTIFICATION: &str = "Added relationship to %1 \"%2\"";

/// Template used when neither the rule nor the configuration sets one.
pub const DEFAULT_REMOVE_NOTIFICATION: &str = "Removed relationship to %1 \"%2\"";

/// Replaces `%1`, `%2`, ... with `args` in a single pass. Inserted text is
/// not scanned again. Placeholders without an argument are left as written.
pub fn format_message(template: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let arg = after[..digits]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|index| args.get(index));

        match arg {
            Some(arg) => {
                out.push_str(arg);
                rest = &after[digits..];
            }
            None => {
                out.push('%');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Delivers relationship change messages to the host's sink.
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Notifier { sink }
    }

    pub fn relationship_added(&self, template: &str, related: &ResolvedRecord) {
        self.send(template, related, Severity::Info);
    }

    pub fn relationship_removed(&self, template: &str, related: &ResolvedRecord) {
        self.send(template, related, Severity::Info);
    }

    fn send(&self, template: &str, related: &ResolvedRecord, severity: Severity) {
        let message = format_message(template, &[related.type_name.as_str(), related.display_name.as_str()]);
        if let Err(e) = self.sink.notify(&message, severity) {
            error!("Failed to deliver notification \"{}\": {}", message, e);
        }
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}
