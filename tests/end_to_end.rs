//! The full reference stack: ReferenceEngine + ByteTokenizer + Runner.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;
use llmrun::engine::{EngineMetadata, PrefillResult, StepOutput};
use llmrun::runner::{from_fn, ChannelSink, CollectSink, RecordingTelemetry};
use llmrun::runtime::{ReferenceConfig, ReferenceEngine};
use llmrun::tokenizer::ByteTokenizer;
use llmrun::{
    ExecutionEngine, GenerationConfig, Outcome, Runner, RunnerError, RunnerState, SamplingParams,
    StopTokenPolicy, TokenId,
};

fn greedy(max_tokens: usize) -> GenerationConfig {
    GenerationConfig::default()
        .with_max_tokens(max_tokens)
        .with_sampling(SamplingParams::greedy())
}

fn reference_runner(config: ReferenceConfig) -> Runner<ReferenceEngine, ByteTokenizer> {
    let runner = Runner::new(ReferenceEngine::new(config), ByteTokenizer::new());
    runner.load().unwrap();
    runner
}

#[test]
fn reference_generation_is_deterministic() {
    let runner = reference_runner(ReferenceConfig::default());

    let mut first = CollectSink::new();
    let mut second = CollectSink::new();
    let a = runner.generate("The quick", &greedy(24), &mut first).unwrap();
    let b = runner.generate("The quick", &greedy(24), &mut second).unwrap();

    assert_eq!(a, b);
    assert_eq!(first.tokens, second.tokens);
    assert!(first.tokens.len() <= 24);
}

#[test]
fn seeded_sampling_is_reproducible_across_runners() {
    let config = GenerationConfig::default()
        .with_max_tokens(16)
        .with_sampling(SamplingParams {
            temperature: 0.9,
            seed: 1234,
            ..SamplingParams::default()
        });

    let run = || {
        let runner = reference_runner(ReferenceConfig::default());
        let mut sink = CollectSink::new();
        runner.generate("seed me", &config, &mut sink).unwrap();
        sink.tokens
    };
    assert_eq!(run(), run());
}

#[test]
fn context_window_bounds_generation() {
    let runner = reference_runner(ReferenceConfig {
        max_context_len: 12,
        vocab_size: 256,
        eos_id: None,
        ..ReferenceConfig::default()
    });

    let mut sink = CollectSink::new();
    let outcome = runner.generate("abcd", &greedy(100), &mut sink).unwrap();
    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(sink.tokens.len(), 8);

    let err = runner
        .generate("abcdefghijkl", &greedy(1), &mut CollectSink::new())
        .unwrap_err();
    assert!(matches!(
        err,
        RunnerError::ContextOverflow {
            prompt_tokens: 12,
            max_context_len: 12
        }
    ));
}

#[test]
fn echo_and_stats_through_the_facade() {
    let hook = RecordingTelemetry::new();
    let runner = Runner::new(ReferenceEngine::default(), ByteTokenizer::new())
        .with_telemetry(Arc::new(hook.clone()));
    runner.load().unwrap();

    let mut sink = CollectSink::new();
    runner
        .generate("hi", &greedy(5).with_echo(true), &mut sink)
        .unwrap();
    assert_eq!(sink.tokens[0], "hi");

    let stats = runner.last_stats().unwrap();
    assert_eq!(stats.prompt_tokens, 2);
    assert_eq!(stats.generated_tokens, sink.tokens.len() - 1);
    assert_eq!(hook.last_stats(), Some(stats));
}

#[test]
fn warmup_then_generate() {
    let runner = reference_runner(ReferenceConfig::default());
    runner.warmup("warm", 4).unwrap();
    assert!(runner.last_stats().is_none());

    let outcome = runner
        .generate("go", &greedy(3), &mut CollectSink::new())
        .unwrap();
    assert!(matches!(outcome, Outcome::Completed | Outcome::StoppedAtToken));
    runner.reset().unwrap();
    assert!(runner.last_stats().is_none());
}

#[test]
fn stop_from_another_thread() {
    let runner = reference_runner(ReferenceConfig {
        max_context_len: 4096,
        vocab_size: 256,
        eos_id: None,
        ..ReferenceConfig::default()
    });
    let handle = runner.stop_handle();
    let (tx, rx) = unbounded::<String>();
    // About 1ms per token.
    let mut sink = from_fn(move |text| {
        tx.send(text.to_string())?;
        thread::sleep(Duration::from_millis(1));
        Ok(())
    });

    let watcher = thread::spawn(move || {
        let mut seen = 0usize;
        for _ in rx.iter() {
            seen += 1;
            if seen == 5 {
                handle.stop();
            }
        }
        seen
    });

    let outcome = runner.generate("count", &greedy(4000), &mut sink).unwrap();
    drop(sink);
    let seen = watcher.join().unwrap();

    assert_eq!(outcome, Outcome::Cancelled);
    assert!((5..4000).contains(&seen));
    assert_eq!(runner.state(), RunnerState::Loaded);
}

/// Emits the UTF-8 bytes of a fixed string, then ends the sequence.
struct BytesEngine {
    bytes: Vec<u8>,
    cursor: usize,
}

impl ExecutionEngine for BytesEngine {
    fn load(&mut self) -> llmrun::engine::Result<()> {
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        true
    }

    fn metadata(&self) -> EngineMetadata {
        EngineMetadata::default()
    }

    fn prefill(
        &mut self,
        tokens: &[TokenId],
        _sampling: &SamplingParams,
    ) -> llmrun::engine::Result<PrefillResult> {
        Ok(PrefillResult {
            tokens_processed: tokens.len(),
        })
    }

    fn step(&mut self, _position: usize) -> llmrun::engine::Result<StepOutput> {
        let out = self
            .bytes
            .get(self.cursor)
            .map_or(StepOutput::EndOfSequence, |&b| {
                StepOutput::Token(TokenId::from(b))
            });
        self.cursor += 1;
        Ok(out)
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}

#[test]
fn multibyte_characters_arrive_whole() {
    let engine = BytesEngine {
        bytes: "né🙂".as_bytes().to_vec(),
        cursor: 0,
    };
    let runner = Runner::new(engine, ByteTokenizer::new());
    runner.load().unwrap();

    let mut pieces = Vec::new();
    let mut sink = from_fn(|text| {
        pieces.push(text.to_string());
        Ok(())
    });
    let outcome = runner.generate("x", &greedy(32), &mut sink).unwrap();
    drop(sink);

    assert_eq!(outcome, Outcome::StoppedAtToken);
    assert_eq!(pieces.len(), "né🙂".len());
    assert_eq!(pieces.concat(), "né🙂");
    assert!(pieces.iter().all(|p| p.is_empty() || p.chars().count() == 1));
}

#[test]
fn truncated_character_is_flushed_as_replacement() {
    let engine = BytesEngine {
        bytes: vec![0x41, 0xC3],
        cursor: 0,
    };
    let runner = Runner::new(engine, ByteTokenizer::new());
    runner.load().unwrap();

    let mut pieces = Vec::new();
    let mut sink = from_fn(|text| {
        pieces.push(text.to_string());
        Ok(())
    });
    let outcome = runner.generate("x", &greedy(32), &mut sink).unwrap();
    drop(sink);

    assert_eq!(outcome, Outcome::StoppedAtToken);
    assert_eq!(pieces, vec!["A", "", "\u{FFFD}"]);
    assert_eq!(runner.last_stats().unwrap().generated_tokens, 2);

    // Nothing carries over into the next generation.
    let mut pieces = Vec::new();
    let mut sink = from_fn(|text| {
        pieces.push(text.to_string());
        Ok(())
    });
    runner.generate("x", &greedy(32), &mut sink).unwrap();
    drop(sink);
    assert_eq!(pieces, vec!["A", "", "\u{FFFD}"]);
}

#[test]
fn stop_token_policy_applies_to_reference_stack() {
    let engine = BytesEngine {
        bytes: b"ab;cd".to_vec(),
        cursor: 0,
    };
    let runner = Runner::new(engine, ByteTokenizer::new());
    runner.load().unwrap();
    let semicolon = TokenId::from(b';');

    let (tx, rx) = unbounded();
    let mut sink = ChannelSink::new(tx.clone());
    let config = greedy(10).with_stop_tokens([semicolon]);
    runner.generate("x", &config, &mut sink).unwrap();
    let config = config.with_stop_token_policy(StopTokenPolicy::Deliver);
    runner.generate("x", &config, &mut sink).unwrap();
    drop((sink, tx));

    assert_eq!(rx.iter().collect::<String>(), "abab;");
}
