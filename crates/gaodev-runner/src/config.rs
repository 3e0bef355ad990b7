//! Endpoint configuration for the `rig-core` OpenAI-compatible client,
//! env-var overridable with built-in fallbacks, following the teacher's
//! `SwarmConfig`/`Endpoint` convention of one struct per inference target.

/// One OpenAI-compatible inference endpoint: base URL, model name, API key.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    /// Max agent turns per `execute`/`executeCeremony` call before giving up
    /// and returning whatever the agent last produced.
    pub max_turns: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("GAODEV_RUNNER_URL").unwrap_or_else(|_| "http://localhost:8080/v1".into()),
            model: std::env::var("GAODEV_RUNNER_MODEL").unwrap_or_else(|_| "default".into()),
            api_key: std::env::var("GAODEV_RUNNER_API_KEY").unwrap_or_else(|_| "not-needed".into()),
            max_turns: std::env::var("GAODEV_RUNNER_MAX_TURNS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(8),
        }
    }
}
