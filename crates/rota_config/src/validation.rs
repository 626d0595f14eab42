use crate::settings::{RotationMethod, RotationSettings};

/// Validation output for a loaded rotation settings row.
///
/// Same collect-then-report shape the teacher uses for its own config
/// validation: errors make the settings unusable, warnings don't.
#[derive(Debug, Default)]
pub struct ConfigReport {
    warnings: Vec<String>,
    errors: Vec<String>,
}

impl ConfigReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn format(&self) -> String {
        let mut out = String::new();
        if !self.errors.is_empty() {
            out.push_str("Errors:\n");
            for err in &self.errors {
                out.push_str("  - ");
                out.push_str(err);
                out.push('\n');
            }
        }
        if !self.warnings.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("Warnings:\n");
            for warn in &self.warnings {
                out.push_str("  - ");
                out.push_str(warn);
                out.push('\n');
            }
        }
        out
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }
}

/// Validate a rotation settings row and return a report of issues.
///
/// The settings watcher refuses to swap in settings whose report
/// `has_errors()`; it logs and applies whatever the previous good settings
/// were instead.
pub fn validate(settings: &RotationSettings) -> ConfigReport {
    let mut report = ConfigReport::default();

    validate_rate_limited_params(settings, &mut report);
    validate_dispatch_params(settings, &mut report);

    report
}

fn validate_rate_limited_params(settings: &RotationSettings, report: &mut ConfigReport) {
    if settings.method != RotationMethod::RateLimited {
        if settings.window_seconds == 0 || settings.max_requests_per_window == 0 {
            report.warn(
                "window_seconds/max_requests_per_window are unused by the active method",
            );
        }
        return;
    }

    if settings.window_seconds == 0 {
        report.error("rate-limited method requires window_seconds > 0");
    }
    // max_requests_per_window = 0 is a deliberate pause of this method, not
    // a misconfiguration — the selector reports all_at_limit for every
    // candidate rather than stopping the process.
}

fn validate_dispatch_params(settings: &RotationSettings, report: &mut ConfigReport) {
    if settings.timeout_ms == 0 {
        report.error("timeout_ms must be greater than 0");
    }
    if settings.retries == 0 {
        report.error("retries must be at least 1");
    }
    if !settings.fallback && settings.retries > 1 {
        report.warn("retries > 1 has no effect while fallback is disabled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(method: RotationMethod) -> RotationSettings {
        RotationSettings {
            method,
            ..RotationSettings::default()
        }
    }

    #[test]
    fn rejects_zero_window_for_rate_limited() {
        let mut s = settings(RotationMethod::RateLimited);
        s.window_seconds = 0;
        let report = validate(&s);
        assert!(report.has_errors());
    }

    #[test]
    fn zero_window_is_only_a_warning_for_other_methods() {
        let mut s = settings(RotationMethod::RoundRobin);
        s.window_seconds = 0;
        let report = validate(&s);
        assert!(report.is_ok());
        assert!(!report.warnings().is_empty());
    }

    #[test]
    fn zero_cap_is_valid_for_rate_limited() {
        let mut s = settings(RotationMethod::RateLimited);
        s.window_seconds = 60;
        s.max_requests_per_window = 0;
        let report = validate(&s);
        assert!(report.is_ok());
    }

    #[test]
    fn rejects_zero_timeout_and_zero_retries() {
        let mut s = settings(RotationMethod::RoundRobin);
        s.timeout_ms = 0;
        s.retries = 0;
        let report = validate(&s);
        assert_eq!(report.errors().len(), 2);
    }

    #[test]
    fn default_settings_are_valid() {
        let report = validate(&RotationSettings::default());
        assert!(report.is_ok());
    }
}
