//! Scan-matcher configuration, read from a TOML file.
//!
//! Every key is optional; a missing key takes the default listed on its
//! field.  The alignment-solver tuning lives in a `[solver]` table and is
//! handed verbatim to the [`Aligner`][crate::solver::Aligner].
//!
//! ```toml
//! base_frame = "base_footprint"
//! kf_dist_linear = 0.25
//!
//! [solver]
//! max_iterations = 20
//! do_compute_covariance = true
//!
//! [telemetry]
//! log_format = "json"
//! otlp_endpoint = "http://localhost:4318"
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use scanmatch_perception::covariance::DefaultCovariance;
use scanmatch_perception::fusion::PredictionSettings;
use scanmatch_perception::point_set::CloudFilter;
use scanmatch_types::ScanMatchError;
use serde::{Deserialize, Serialize};

use crate::keyframe::KeyframePolicy;

// ────────────────────────────────────────────────────────────────────────────
// ScanMatcherConfig
// ────────────────────────────────────────────────────────────────────────────

/// Full pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanMatcherConfig {
    /// Platform frame (default `"base_link"`).
    pub base_frame: String,
    /// Frame the accumulated pose is expressed in (default `"world"`).
    pub fixed_frame: String,

    /// Consume point clouds instead of laser scans (default `false`).
    pub use_cloud_input: bool,
    pub cloud_range_min: f64,
    pub cloud_range_max: f64,
    /// Minimum spacing between kept cloud points, metres (default `0.05`).
    pub cloud_res: f64,

    /// Keyframe promotion distance, metres (default `0.10`).
    pub kf_dist_linear: f64,
    /// Keyframe promotion angle, radians (default 10°).
    pub kf_dist_angular: f64,

    pub use_imu: bool,
    pub use_odom: bool,
    pub use_vel: bool,
    pub use_tf: bool,
    /// Velocity arrives as `TwistStamped` rather than `Twist`.
    pub stamped_vel: bool,
    /// Frame-lookup timeout, seconds (default `0.1`).
    pub tf_timeout: f64,

    pub publish_tf: bool,
    pub publish_pose: bool,
    pub publish_pose_stamped: bool,
    pub publish_pose_with_covariance: bool,
    pub publish_pose_with_covariance_stamped: bool,

    /// `[xx, yy, zz]` variances used when the solver gives no covariance.
    pub position_covariance: [f64; 3],
    /// `[roll, pitch, yaw]` variances used when the solver gives no
    /// covariance.
    pub orientation_covariance: [f64; 3],

    /// Level published poses with roll/pitch from the orientation source.
    pub add_imu_roll_pitch: bool,

    pub solver: SolverConfig,

    pub telemetry: TelemetryConfig,
}

impl Default for ScanMatcherConfig {
    fn default() -> Self {
        Self {
            base_frame: "base_link".to_string(),
            fixed_frame: "world".to_string(),
            use_cloud_input: false,
            cloud_range_min: 0.1,
            cloud_range_max: 50.0,
            cloud_res: 0.05,
            kf_dist_linear: 0.10,
            kf_dist_angular: 10.0_f64.to_radians(),
            use_imu: true,
            use_odom: true,
            use_vel: false,
            use_tf: true,
            stamped_vel: false,
            tf_timeout: 0.1,
            publish_tf: true,
            publish_pose: true,
            publish_pose_stamped: false,
            publish_pose_with_covariance: false,
            publish_pose_with_covariance_stamped: false,
            position_covariance: [1e-9; 3],
            orientation_covariance: [1e-9; 3],
            add_imu_roll_pitch: false,
            solver: SolverConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl ScanMatcherConfig {
    /// Parse a TOML document.  Environment overrides are not applied.
    pub fn from_toml_str(raw: &str) -> Result<Self, ScanMatchError> {
        toml::from_str(raw).map_err(|e| ScanMatchError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load the config from `path`, apply `SCANMATCH_*` overrides and
    /// validate.  Returns `Ok(None)` if the file does not exist.
    pub fn load_from(path: &Path) -> Result<Option<Self>, ScanMatchError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path).map_err(|e| {
            ScanMatchError::Config(format!("Failed to read config at {}: {e}", path.display()))
        })?;
        let mut cfg = Self::from_toml_str(&raw)?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(Some(cfg))
    }

    /// Serialize back to TOML.
    pub fn to_toml_string(&self) -> Result<String, ScanMatchError> {
        toml::to_string_pretty(self)
            .map_err(|e| ScanMatchError::Config(format!("Failed to serialize config: {e}")))
    }

    /// Apply environment variable overrides.
    ///
    /// | Variable | Config field |
    /// |---|---|
    /// | `SCANMATCH_BASE_FRAME` | `base_frame` |
    /// | `SCANMATCH_FIXED_FRAME` | `fixed_frame` |
    /// | `SCANMATCH_TF_TIMEOUT` | `tf_timeout` (seconds; unparsable values are ignored) |
    /// | `RUST_LOG` | `telemetry.log_filter` |
    /// | `SCANMATCH_LOG_FORMAT` | `telemetry.log_format` (`compact` or `json`) |
    /// | `OTEL_EXPORTER_OTLP_ENDPOINT` | `telemetry.otlp_endpoint` |
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SCANMATCH_BASE_FRAME") {
            self.base_frame = v;
        }
        if let Ok(v) = std::env::var("SCANMATCH_FIXED_FRAME") {
            self.fixed_frame = v;
        }
        if let Ok(v) = std::env::var("SCANMATCH_TF_TIMEOUT")
            && let Ok(secs) = v.parse::<f64>()
        {
            self.tf_timeout = secs;
        }
        if let Ok(v) = std::env::var("RUST_LOG") {
            self.telemetry.log_filter = v;
        }
        if let Ok(v) = std::env::var(LOG_FORMAT_ENV)
            && let Some(format) = LogFormat::parse(&v)
        {
            self.telemetry.log_format = format;
        }
        if let Ok(v) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            self.telemetry.otlp_endpoint = Some(v);
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ScanMatchError> {
        if !(self.tf_timeout >= 0.0 && self.tf_timeout.is_finite()) {
            return Err(ScanMatchError::Config(format!(
                "tf_timeout must be finite and non-negative, got {}",
                self.tf_timeout
            )));
        }
        if !(self.cloud_res >= 0.0) {
            return Err(ScanMatchError::Config(format!(
                "cloud_res must be non-negative, got {}",
                self.cloud_res
            )));
        }
        if self.use_cloud_input && self.cloud_range_min >= self.cloud_range_max {
            return Err(ScanMatchError::Config(format!(
                "cloud_range_min ({}) must be below cloud_range_max ({})",
                self.cloud_range_min, self.cloud_range_max
            )));
        }
        if self.base_frame.is_empty() || self.fixed_frame.is_empty() {
            return Err(ScanMatchError::Config("frame names must not be empty".to_string()));
        }
        if self.telemetry.service_name.is_empty() {
            return Err(ScanMatchError::Config(
                "telemetry.service_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Lookup timeout; values too large to represent saturate rather than
    /// turning into "don't wait".
    pub fn tf_timeout(&self) -> Duration {
        if self.tf_timeout > 0.0 {
            Duration::try_from_secs_f64(self.tf_timeout).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        }
    }

    pub fn prediction_settings(&self) -> PredictionSettings {
        PredictionSettings {
            use_vel: self.use_vel,
            use_odom: self.use_odom,
            use_imu: self.use_imu,
            use_tf: self.use_tf,
            stamped_vel: self.stamped_vel,
        }
    }

    pub fn cloud_filter(&self) -> CloudFilter {
        CloudFilter {
            range_min: self.cloud_range_min,
            range_max: self.cloud_range_max,
            resolution: self.cloud_res,
        }
    }

    pub fn default_covariance(&self) -> DefaultCovariance {
        DefaultCovariance::from_config(&self.position_covariance, &self.orientation_covariance)
    }

    pub fn keyframe_policy(&self) -> KeyframePolicy {
        KeyframePolicy::new(self.kf_dist_linear, self.kf_dist_angular)
    }

    /// `"cloud"` or `"scan"`.
    pub fn input_kind(&self) -> &'static str {
        if self.use_cloud_input { "cloud" } else { "scan" }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TelemetryConfig
// ────────────────────────────────────────────────────────────────────────────

/// Environment variable selecting the log line format.
pub const LOG_FORMAT_ENV: &str = "SCANMATCH_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    /// Newline-delimited JSON.
    Json,
}

impl LogFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// `[telemetry]` table: log output and optional OTLP span export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `service.name` of exported spans (default `"laser-scan-matcher"`).
    pub service_name: String,
    /// `EnvFilter` directive (default `"info"`).
    pub log_filter: String,
    pub log_format: LogFormat,
    /// OTLP/HTTP collector base URL; span export is off when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "laser-scan-matcher".to_string(),
            log_filter: "info".to_string(),
            log_format: LogFormat::Compact,
            otlp_endpoint: None,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SolverConfig
// ────────────────────────────────────────────────────────────────────────────

/// Alignment-solver tuning, passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub max_angular_correction_deg: f64,
    pub max_linear_correction: f64,
    pub max_iterations: u32,
    pub epsilon_xy: f64,
    pub epsilon_theta: f64,
    pub max_correspondence_dist: f64,
    /// Noise of the range readings (metres).
    pub sigma: f64,
    pub use_corr_tricks: bool,
    pub restart: bool,
    pub restart_threshold_mean_error: f64,
    pub restart_dt: f64,
    pub restart_dtheta: f64,
    pub clustering_threshold: f64,
    pub orientation_neighbourhood: u32,
    pub use_point_to_line_distance: bool,
    pub do_alpha_test: bool,
    pub do_alpha_test_threshold_deg: f64,
    pub outliers_max_perc: f64,
    pub outliers_adaptive_order: f64,
    pub outliers_adaptive_mult: f64,
    pub do_visibility_test: bool,
    pub outliers_remove_doubles: bool,
    pub do_compute_covariance: bool,
    pub debug_verify_tricks: bool,
    pub use_ml_weights: bool,
    pub use_sigma_weights: bool,
    /// Filled by the pipeline from the input's range bounds.
    #[serde(skip)]
    pub min_reading: f64,
    /// Filled by the pipeline from the input's range bounds.
    #[serde(skip)]
    pub max_reading: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_angular_correction_deg: 45.0,
            max_linear_correction: 0.5,
            max_iterations: 10,
            epsilon_xy: 1e-6,
            epsilon_theta: 1e-6,
            max_correspondence_dist: 0.3,
            sigma: 0.01,
            use_corr_tricks: true,
            restart: false,
            restart_threshold_mean_error: 0.01,
            restart_dt: 1.0,
            restart_dtheta: 0.1,
            clustering_threshold: 0.25,
            orientation_neighbourhood: 20,
            use_point_to_line_distance: true,
            do_alpha_test: false,
            do_alpha_test_threshold_deg: 20.0,
            outliers_max_perc: 0.90,
            outliers_adaptive_order: 0.7,
            outliers_adaptive_mult: 2.0,
            do_visibility_test: false,
            outliers_remove_doubles: true,
            do_compute_covariance: false,
            debug_verify_tricks: false,
            use_ml_weights: false,
            use_sigma_weights: false,
            min_reading: 0.0,
            max_reading: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ScanMatcherConfig::default();
        assert_eq!(cfg.base_frame, "base_link");
        assert_eq!(cfg.fixed_frame, "world");
        assert!(!cfg.use_cloud_input);
        assert!((cfg.kf_dist_angular - 0.174_532_925).abs() < 1e-8);
        assert!(cfg.use_imu && cfg.use_odom && cfg.use_tf && !cfg.use_vel);
        assert!(cfg.publish_tf && cfg.publish_pose);
        assert!(!cfg.publish_pose_stamped);
        assert_eq!(cfg.position_covariance, [1e-9; 3]);
        assert_eq!(cfg.solver.max_iterations, 10);
        assert!(!cfg.solver.do_compute_covariance);
        assert_eq!(cfg.tf_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn missing_keys_take_defaults() {
        let cfg = ScanMatcherConfig::from_toml_str(
            r#"
            base_frame = "base_footprint"
            kf_dist_linear = 0.25

            [solver]
            max_iterations = 20
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.base_frame, "base_footprint");
        assert_eq!(cfg.fixed_frame, "world");
        assert_eq!(cfg.kf_dist_linear, 0.25);
        assert_eq!(cfg.solver.max_iterations, 20);
        assert_eq!(cfg.solver.max_correspondence_dist, 0.3);
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = ScanMatcherConfig::from_toml_str("kf_dist_linear = \"far\"").unwrap_err();
        assert!(matches!(err, ScanMatchError::Config(_)));
    }

    #[test]
    fn roundtrip_through_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("scanmatch.toml");

        let mut cfg = ScanMatcherConfig::default();
        cfg.use_cloud_input = true;
        cfg.solver.do_compute_covariance = true;
        fs::write(&path, cfg.to_toml_string().expect("serialize")).expect("write");

        let loaded = ScanMatcherConfig::load_from(&path).expect("load ok").expect("some");
        assert!(loaded.use_cloud_input);
        assert!(loaded.solver.do_compute_covariance);
        assert_eq!(loaded.cloud_res, 0.05);
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let result = ScanMatcherConfig::load_from(&dir.path().join("absent.toml")).expect("no error");
        assert!(result.is_none());
    }

    #[test]
    fn load_from_rejects_invalid_values() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("bad.toml");
        fs::write(&path, "cloud_res = -1.0").expect("write");
        let err = ScanMatcherConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("cloud_res"));
    }

    #[test]
    fn validate_rejects_non_finite_timeout() {
        for bad in [f64::INFINITY, f64::NAN, -0.5] {
            let cfg = ScanMatcherConfig {
                tf_timeout: bad,
                ..ScanMatcherConfig::default()
            };
            assert!(cfg.validate().is_err(), "accepted tf_timeout = {bad}");
        }
    }

    #[test]
    fn oversized_timeout_saturates() {
        let cfg = ScanMatcherConfig {
            tf_timeout: f64::INFINITY,
            ..ScanMatcherConfig::default()
        };
        assert_eq!(cfg.tf_timeout(), Duration::MAX);

        let cfg = ScanMatcherConfig {
            tf_timeout: 0.25,
            ..ScanMatcherConfig::default()
        };
        assert_eq!(cfg.tf_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn validate_rejects_inverted_cloud_range() {
        let cfg = ScanMatcherConfig {
            use_cloud_input: true,
            cloud_range_min: 5.0,
            cloud_range_max: 1.0,
            ..ScanMatcherConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_negative_timeout() {
        let cfg = ScanMatcherConfig {
            tf_timeout: -0.5,
            ..ScanMatcherConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ScanMatchError::Config(_))));
    }

    #[test]
    fn apply_env_overrides_changes_frames() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe {
            std::env::set_var("SCANMATCH_BASE_FRAME", "chassis");
            std::env::set_var("SCANMATCH_FIXED_FRAME", "odom");
        }
        let mut cfg = ScanMatcherConfig::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.base_frame, "chassis");
        assert_eq!(cfg.fixed_frame, "odom");
        unsafe {
            std::env::remove_var("SCANMATCH_BASE_FRAME");
            std::env::remove_var("SCANMATCH_FIXED_FRAME");
        }
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_timeout() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("SCANMATCH_TF_TIMEOUT", "soon") };
        let mut cfg = ScanMatcherConfig::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.tf_timeout, 0.1);
        unsafe { std::env::remove_var("SCANMATCH_TF_TIMEOUT") };
    }

    #[test]
    fn telemetry_table_parses() {
        let cfg = ScanMatcherConfig::from_toml_str(
            r#"
            [telemetry]
            service_name = "rover-scanmatch"
            log_format = "json"
            otlp_endpoint = "http://collector:4318"
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.telemetry.service_name, "rover-scanmatch");
        assert_eq!(cfg.telemetry.log_format, LogFormat::Json);
        assert_eq!(cfg.telemetry.log_filter, "info");
        assert_eq!(cfg.telemetry.otlp_endpoint.as_deref(), Some("http://collector:4318"));
    }

    #[test]
    fn telemetry_defaults_survive_serialization() {
        let raw = ScanMatcherConfig::default().to_toml_string().expect("serialize");
        assert!(!raw.contains("otlp_endpoint"));
        let back = ScanMatcherConfig::from_toml_str(&raw).expect("parse");
        assert_eq!(back.telemetry, TelemetryConfig::default());
    }

    #[test]
    fn log_format_parse_is_case_insensitive() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse(" compact "), Some(LogFormat::Compact));
        assert_eq!(LogFormat::parse("pretty"), None);
    }

    #[test]
    fn apply_env_overrides_selects_log_format() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var(LOG_FORMAT_ENV, "json") };
        let mut cfg = ScanMatcherConfig::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.telemetry.log_format, LogFormat::Json);
        unsafe { std::env::remove_var(LOG_FORMAT_ENV) };
    }

    #[test]
    fn validate_rejects_empty_service_name() {
        let mut cfg = ScanMatcherConfig::default();
        cfg.telemetry.service_name.clear();
        assert!(matches!(cfg.validate(), Err(ScanMatchError::Config(_))));
    }

    #[test]
    fn derived_settings_follow_config() {
        let cfg = ScanMatcherConfig {
            use_vel: true,
            stamped_vel: true,
            cloud_res: 0.2,
            ..ScanMatcherConfig::default()
        };
        let prediction = cfg.prediction_settings();
        assert!(prediction.use_vel && prediction.stamped_vel);
        assert_eq!(cfg.cloud_filter().resolution, 0.2);
        assert_eq!(cfg.default_covariance().yaw, 1e-9);
    }
}
