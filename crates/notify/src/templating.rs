//! Minijinja template rendering for report mails.
//!
//! Templates are arbitrary strings (not pre-registered), so a fresh
//! [`minijinja::Environment`] is created per render call.

use lookout_core::time::format_minutes;
use lookout_core::{AnomalyReport, ReportStatus};

use crate::traits::NotifyError;

pub const DEFAULT_SUBJECT: &str =
    "[lookout] job {{ job_id }}: {{ status | upper }}{% if anomalous %} ({{ anomalous }} anomalous){% endif %}";

pub const DEFAULT_BODY: &str = "\
Job {{ job_id }} ({{ frequency }}) finished with status {{ status | upper }}.
{% for r in reports %}
- {{ r.window_end }} {{ r.status }}{% if r.metric %} {{ r.metric }}{% endif %}{% if r.filters %} [{{ r.filters }}]{% endif %}
{%- for i in r.intervals %}
    {{ i.start }} observed {{ i.observed | round(2) }} expected {{ i.expected | round(2) }}
{%- endfor %}
{%- if r.url %}
    {{ r.url }}
{%- endif %}
{%- endfor %}
";

/// One report as seen by templates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReportLine {
    pub status: String,
    pub metric: Option<String>,
    pub filters: Option<String>,
    pub window_end: String,
    pub deviation: Option<String>,
    pub url: Option<String>,
    pub intervals: Vec<IntervalLine>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IntervalLine {
    pub start: String,
    pub observed: f64,
    pub expected: f64,
}

/// Context data available to report templates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TemplateContext {
    pub job_id: i64,
    pub frequency: String,
    /// Overall status: the worst status among the reports.
    pub status: String,
    pub anomalous: usize,
    pub reports: Vec<ReportLine>,
}

impl TemplateContext {
    pub fn from_reports(reports: &[AnomalyReport]) -> Self {
        let overall = reports
            .iter()
            .map(|r| r.status)
            .max_by_key(|s| severity(*s))
            .unwrap_or(ReportStatus::Success);
        Self {
            job_id: reports.first().map(|r| r.job_id).unwrap_or_default(),
            frequency: reports
                .first()
                .map(|r| r.frequency.to_string())
                .unwrap_or_default(),
            status: overall.to_string().to_lowercase(),
            anomalous: reports.iter().filter(|r| r.has_anomaly()).count(),
            reports: reports.iter().map(report_line).collect(),
        }
    }
}

fn severity(status: ReportStatus) -> u8 {
    match status {
        ReportStatus::Success => 0,
        ReportStatus::NoData => 1,
        ReportStatus::Anomaly => 2,
        ReportStatus::Error => 3,
    }
}

fn report_line(r: &AnomalyReport) -> ReportLine {
    ReportLine {
        status: r.status.to_string(),
        metric: r.metric_name.clone(),
        filters: r.group_by_filters.clone().filter(|f| !f.is_empty()),
        window_end: format_minutes(r.query_end_time),
        deviation: r.deviation.clone(),
        url: r.query_url.clone(),
        intervals: r
            .intervals
            .iter()
            .map(|i| IntervalLine {
                start: format_minutes(i.start),
                observed: i.observed,
                expected: i.expected,
            })
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMail {
    pub subject: String,
    pub body: String,
}

/// Renders report mails using minijinja.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    subject: String,
    body: String,
}

impl TemplateRenderer {
    /// Renderer with the built-in subject and body templates.
    pub fn new() -> Self {
        Self {
            subject: DEFAULT_SUBJECT.to_string(),
            body: DEFAULT_BODY.to_string(),
        }
    }

    /// Renderer with custom templates, validated up front.
    pub fn with_templates(subject: &str, body: &str) -> Result<Self, NotifyError> {
        validate(subject)?;
        validate(body)?;
        Ok(Self {
            subject: subject.to_string(),
            body: body.to_string(),
        })
    }

    /// Build a configured minijinja environment with custom filters.
    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();
        env.add_filter("round", round_filter);
        env.add_filter("lower", lower_filter);
        env.add_filter("upper", upper_filter);
        env
    }

    pub fn render(&self, reports: &[AnomalyReport]) -> Result<RenderedMail, NotifyError> {
        let ctx = TemplateContext::from_reports(reports);
        let env = Self::build_env();
        let subject = env
            .render_str(&self.subject, &ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))?;
        let body = env
            .render_str(&self.body, &ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))?;
        Ok(RenderedMail {
            subject: subject.trim().to_string(),
            body,
        })
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Check that a template string parses without evaluating it.
pub fn validate(template_str: &str) -> Result<(), NotifyError> {
    let env = TemplateRenderer::build_env();
    env.template_from_str(template_str)
        .map_err(|e| NotifyError::Template(e.to_string()))?;
    Ok(())
}

/// Custom filter: round a float to N decimal places.
fn round_filter(value: f64, decimals: Option<u32>) -> String {
    let n = decimals.unwrap_or(0);
    format!("{:.prec$}", value, prec = n as usize)
}

fn lower_filter(value: String) -> String {
    value.to_lowercase()
}

fn upper_filter(value: String) -> String {
    value.to_uppercase()
}
