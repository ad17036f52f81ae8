//! # llmrun-cli
//!
//! Wires the reference engine, the byte tokenizer and the generation runner
//! into a streaming command-line demo.
//!
//! Text goes to the given writer as each token is produced. An optional timer
//! thread cancels the generation through a [`StopHandle`](llmrun_runner::StopHandle),
//! which is how an interactive front end would wire a "stop" button.

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use llmrun_runner::{
    from_fn, ConfigError, GenerationConfig, GenerationStats, Outcome, Runner, RunnerError,
    StopTokenPolicy,
};
use llmrun_runtime::{ReferenceConfig, ReferenceEngine};
use llmrun_tokenizer::ByteTokenizer;

/// Errors surfaced by the CLI.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("output write failed")]
    Io(#[from] io::Error),
}

/// `err` followed by each of its sources, joined with `": "`.
pub fn error_chain(err: &dyn Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

/// Flags of `llmrun generate`.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct GenerateArgs {
    /// Input prompt text.
    #[arg(short, long)]
    pub prompt: String,

    /// Maximum number of tokens to generate.
    #[arg(short, long)]
    pub max_tokens: Option<usize>,

    /// Sampling temperature (0 = greedy).
    #[arg(short, long)]
    pub temperature: Option<f32>,

    /// Keep only the K most likely tokens (0 = disabled).
    #[arg(long)]
    pub top_k: Option<usize>,

    /// Nucleus sampling threshold in (0, 1].
    #[arg(long)]
    pub top_p: Option<f32>,

    /// Random seed for reproducible sampling.
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Print the prompt before the generated text.
    #[arg(long)]
    pub echo: bool,

    /// Print the text of the token that ended generation.
    #[arg(long)]
    pub deliver_stop_token: bool,

    /// JSON generation config; the flags above override it.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Cancel the generation after this many milliseconds.
    #[arg(long)]
    pub stop_after_ms: Option<u64>,
}

/// Merge the config file (if any) with the command-line overrides.
pub fn build_config(args: &GenerateArgs) -> Result<GenerationConfig, CliError> {
    let mut config = match &args.config {
        Some(path) => GenerationConfig::from_file(path)?,
        None => GenerationConfig::default(),
    };

    if let Some(n) = args.max_tokens {
        config.max_tokens = n;
    }
    if let Some(t) = args.temperature {
        config.sampling.temperature = t;
    }
    if let Some(k) = args.top_k {
        config.sampling.top_k = k;
    }
    if let Some(p) = args.top_p {
        config.sampling.top_p = p;
    }
    if let Some(seed) = args.seed {
        config.sampling.seed = seed;
    }
    if args.echo {
        config.echo = true;
    }
    if args.deliver_stop_token {
        config.stop_token_policy = StopTokenPolicy::Deliver;
    }

    let sampling = &config.sampling;
    if sampling.temperature.is_nan() || sampling.temperature < 0.0 {
        return Err(CliError::InvalidArgument(format!(
            "temperature must be >= 0 (got {})",
            sampling.temperature
        )));
    }
    if sampling.top_p.is_nan() || sampling.top_p <= 0.0 || sampling.top_p > 1.0 {
        return Err(CliError::InvalidArgument(format!(
            "top_p must be in (0, 1] (got {})",
            sampling.top_p
        )));
    }
    Ok(config)
}

/// A loaded runner over the reference engine and byte tokenizer.
pub fn reference_runner(
    config: ReferenceConfig,
) -> Result<Runner<ReferenceEngine, ByteTokenizer>, CliError> {
    let runner = Runner::new(ReferenceEngine::new(config), ByteTokenizer::new());
    runner.load()?;
    Ok(runner)
}

/// Result of one `generate` invocation.
#[derive(Debug, Clone)]
pub struct GenerateReport {
    pub outcome: Outcome,
    pub stats: Option<GenerationStats>,
}

/// Run `llmrun generate`, streaming text into `out`.
pub fn run_generate<W: Write>(args: &GenerateArgs, out: &mut W) -> Result<GenerateReport, CliError> {
    let config = build_config(args)?;
    let runner = reference_runner(ReferenceConfig::default())?;

    let (done_tx, done_rx) = bounded::<()>(0);
    let timer = args.stop_after_ms.map(|ms| {
        let handle = runner.stop_handle();
        thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(Duration::from_millis(ms)) {
                tracing::debug!(ms, "stop timer fired");
                handle.stop();
            }
        })
    });

    let mut sink = from_fn(|text| {
        out.write_all(text.as_bytes())?;
        out.flush()?;
        Ok(())
    });
    let result = runner.generate(&args.prompt, &config, &mut sink);
    drop(sink);

    drop(done_tx);
    if let Some(timer) = timer {
        let _ = timer.join();
    }

    let outcome = result?;
    writeln!(out)?;
    Ok(GenerateReport {
        outcome,
        stats: runner.last_stats(),
    })
}

/// Text printed by `llmrun info`.
pub fn describe_reference(config: &ReferenceConfig) -> String {
    serde_json::to_string_pretty(config).unwrap_or_else(|e| format!("<unprintable config: {e}>"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(prompt: &str) -> GenerateArgs {
        GenerateArgs {
            prompt: prompt.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gen.json");
        std::fs::write(
            &path,
            r#"{"max_tokens": 9, "sampling": {"temperature": 0.2, "seed": 5}}"#,
        )
        .unwrap();

        let mut a = args("hi");
        a.config = Some(path);
        a.seed = Some(77);
        a.deliver_stop_token = true;
        let config = build_config(&a).unwrap();

        assert_eq!(config.max_tokens, 9);
        assert_eq!(config.sampling.temperature, 0.2);
        assert_eq!(config.sampling.seed, 77);
        assert_eq!(config.stop_token_policy, StopTokenPolicy::Deliver);
    }

    #[test]
    fn missing_config_file_is_reported() {
        let mut a = args("hi");
        a.config = Some(PathBuf::from("/nonexistent/gen.json"));
        assert!(matches!(build_config(&a), Err(CliError::Config(_))));
    }

    #[test]
    fn rejects_bad_sampling_flags() {
        let mut a = args("hi");
        a.temperature = Some(-1.0);
        assert!(matches!(build_config(&a), Err(CliError::InvalidArgument(_))));

        let mut a = args("hi");
        a.top_p = Some(0.0);
        assert!(matches!(build_config(&a), Err(CliError::InvalidArgument(_))));
    }

    #[test]
    fn generate_streams_to_writer() {
        let mut a = args("hello");
        a.max_tokens = Some(6);
        a.temperature = Some(0.0);
        a.echo = true;

        let mut out = Vec::new();
        let report = run_generate(&a, &mut out).unwrap();
        let text = String::from_utf8_lossy(&out);

        assert!(text.starts_with("hello"));
        assert!(text.ends_with('\n'));
        let stats = report.stats.unwrap();
        assert_eq!(stats.prompt_tokens, 5);
        assert!(stats.generated_tokens <= 6);
        assert_eq!(stats.outcome, report.outcome);
    }

    #[test]
    fn greedy_generation_is_reproducible() {
        let mut a = args("abc");
        a.max_tokens = Some(8);
        a.temperature = Some(0.0);

        let mut first = Vec::new();
        let mut second = Vec::new();
        run_generate(&a, &mut first).unwrap();
        run_generate(&a, &mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_prompt_fails() {
        let err = run_generate(&args(""), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, CliError::Runner(RunnerError::EmptyPrompt)));
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))
        }
    }

    #[test]
    fn trailing_newline_failure_is_io_error() {
        let mut a = args("hello");
        a.max_tokens = Some(0);

        let err = run_generate(&a, &mut BrokenPipe).unwrap_err();
        match err {
            CliError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[test]
    fn streaming_write_failure_is_sink_error() {
        let mut a = args("hello");
        a.echo = true;

        let err = run_generate(&a, &mut BrokenPipe).unwrap_err();
        assert!(matches!(err, CliError::Runner(RunnerError::Callback(_))));
        assert_eq!(error_chain(&err), "token sink failed: pipe closed");
    }

    #[test]
    fn error_chain_walks_every_source() {
        let err = CliError::Io(io::Error::other("disk full"));
        assert_eq!(error_chain(&err), "output write failed: disk full");

        let err = CliError::InvalidArgument("top_p must be in (0, 1] (got 0)".into());
        assert_eq!(error_chain(&err), "invalid argument: top_p must be in (0, 1] (got 0)");
    }

    #[test]
    fn info_lists_reference_config() {
        let text = describe_reference(&ReferenceConfig::default());
        assert!(text.contains("max_context_len"));
    }
}
