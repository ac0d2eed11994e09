use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use turnloop_core::context::{estimate_tokens, should_compact, ContextManager, ContextManagerConfig, Truncation};
use turnloop_core::context::CompactionStrategy;
use turnloop_core::types::{ContentBlock, Conversation, Message, TextBlock, ToolUseBlock};
use serde_json::json;

const SYSTEM_PROMPT: &str = "You are a helpful assistant";

fn create_messages(count: usize, text_size: usize) -> Vec<Message> {
    let text = "a".repeat(text_size);
    (0..count)
        .map(|i| {
            if i % 2 == 0 {
                Message::user(&text)
            } else {
                Message::assistant(vec![ContentBlock::Text(TextBlock::new(text.clone()))])
            }
        })
        .collect()
}

fn create_messages_with_tools(count: usize) -> Vec<Message> {
    let mut messages = Vec::new();

    for i in 0..count {
        if i % 3 == 0 {
            messages.push(Message::user("Calculate 2 + 2"));
        } else if i % 3 == 1 {
            let tool_use = ToolUseBlock::new(format!("tool_{i}"), "calculator", json!({"operation": "add", "a": 2, "b": 2}));
            messages.push(Message::assistant(vec![ContentBlock::ToolUse(tool_use)]));
        } else {
            messages.push(Message::tool_result(format!("tool_{}", i - 1), json!({"result": 4}).to_string(), false));
        }
    }

    messages
}

fn bench_estimate_tokens_by_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate_tokens_by_count");

    for count in [0, 1, 5, 10, 20, 50, 100].iter() {
        let messages = create_messages(*count, 100);
        group.bench_with_input(BenchmarkId::from_parameter(count), &messages, |b, msgs| {
            b.iter(|| estimate_tokens(black_box(SYSTEM_PROMPT), black_box(msgs)));
        });
    }

    group.finish();
}

fn bench_estimate_tokens_by_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate_tokens_by_size");

    for size in [10, 100, 1000, 10000].iter() {
        let messages = create_messages(10, *size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &messages, |b, msgs| {
            b.iter(|| estimate_tokens(black_box(SYSTEM_PROMPT), black_box(msgs)));
        });
    }

    group.finish();
}

fn bench_estimate_tokens_with_tools(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate_tokens_with_tools");

    for count in [3, 9, 30, 90].iter() {
        let messages = create_messages_with_tools(*count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &messages, |b, msgs| {
            b.iter(|| estimate_tokens(black_box(SYSTEM_PROMPT), black_box(msgs)));
        });
    }

    group.finish();
}

fn bench_should_compact(c: &mut Criterion) {
    let mut group = c.benchmark_group("should_compact");

    for count in [10, 50, 100].iter() {
        let messages = create_messages(*count, 500);
        group.bench_with_input(BenchmarkId::from_parameter(count), &messages, |b, msgs| {
            b.iter(|| {
                let estimated = estimate_tokens(SYSTEM_PROMPT, black_box(msgs));
                should_compact(black_box(estimated), black_box(32000), black_box(0.70))
            });
        });
    }

    group.finish();
}

// Truncation is the mandatory last-resort strategy, so it's the one worth
// benchmarking directly: it's a tight synchronous loop over draining pairs.
fn bench_truncation_strategy(c: &mut Criterion) {
    let mut group = c.benchmark_group("truncation_strategy");

    let test_cases = vec![
        ("small_budget_200", create_messages(20, 100), 200usize),
        ("medium_budget_500", create_messages(50, 100), 500usize),
        ("large_budget_2000", create_messages(100, 100), 2000usize),
    ];

    let rt = tokio::runtime::Runtime::new().unwrap();

    for (name, messages, budget) in test_cases {
        group.bench_with_input(
            BenchmarkId::new(name, format!("{}/{}", messages.len(), budget)),
            &(messages, budget),
            |b, (msgs, budget)| {
                b.iter(|| {
                    rt.block_on(async {
                        let mut strategy = Truncation::new();
                        strategy
                            .apply(black_box(SYSTEM_PROMPT), black_box(msgs.clone()), black_box(*budget))
                            .await
                    })
                });
            },
        );
    }

    group.finish();
}

fn bench_truncation_with_tools(c: &mut Criterion) {
    let mut group = c.benchmark_group("truncation_with_tools");
    let rt = tokio::runtime::Runtime::new().unwrap();

    for count in [30, 90].iter() {
        let messages = create_messages_with_tools(*count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &messages, |b, msgs| {
            b.iter(|| {
                rt.block_on(async {
                    let mut strategy = Truncation::new();
                    strategy.apply(SYSTEM_PROMPT, black_box(msgs.clone()), black_box(200)).await
                })
            });
        });
    }

    group.finish();
}

// Realistic workflow: the full ToolResultClearing -> Truncation chain a live
// turn loop runs after every assistant response.
fn bench_context_manager_full_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("context_manager_full_chain");
    let rt = tokio::runtime::Runtime::new().unwrap();

    let messages = create_messages_with_tools(60);

    group.bench_function("compact", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut manager = ContextManager::new(ContextManagerConfig {
                    budget: 2000,
                    trigger_ratio: 0.70,
                    ..Default::default()
                });
                let mut convo = Conversation::new(SYSTEM_PROMPT);
                convo.load_from_messages(black_box(messages.clone()));
                manager.compact(&mut convo).await;
                convo
            })
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_estimate_tokens_by_count,
    bench_estimate_tokens_by_size,
    bench_estimate_tokens_with_tools,
    bench_should_compact,
    bench_truncation_strategy,
    bench_truncation_with_tools,
    bench_context_manager_full_chain,
);
criterion_main!(benches);
