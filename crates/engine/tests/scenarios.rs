use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use tracewarden_core::{Span, SpanStatus, TenantId};
use tracewarden_engine::{
    Engine, EngineConfig, EngineError, EngineMetrics, MetricsHooks, RuleSet,
};
use tracewarden_rules::{
    EvalError, MatchEvidence, ParseErrorKind, Rule, RuleDefinition, RuleError, RuleMeta,
    TraceMatcher, TraceView,
};
use tracewarden_rules_dsl::parse_expression;
use tracewarden_violations_memory::MemoryViolationSink;

fn tenant() -> TenantId {
    TenantId::new("acme")
}

fn span(trace: &str, id: &str, op: &str) -> Span {
    Span::new("acme", trace, id, op, op.split('.').next().unwrap_or(op))
}

fn rule(id: &str, expr: &str) -> RuleDefinition {
    RuleDefinition::new(id, format!("rule {id}"), expr)
}

// -- Scenario 1: missing fraud check ----------------------------------------

#[tokio::test]
async fn charge_without_fraud_check_yields_one_violation() {
    let expr = "trace.has(payment.charge_card) and not trace.has(payment.fraud_check)";
    assert!(parse_expression(expr).is_ok());

    let sink = Arc::new(MemoryViolationSink::new());
    let engine = Engine::builder().sink(sink.clone()).build().unwrap();
    engine.deploy_rules(&tenant(), vec![rule("no-fraud-check", expr)]).unwrap();

    let result = engine
        .insert_batch(
            &tenant(),
            vec![
                span("t-bad", "root", "checkout.submit"),
                span("t-bad", "charge", "payment.charge_card").with_parent("root"),
                span("t-good", "root", "checkout.submit"),
                span("t-good", "fraud", "payment.fraud_check").with_parent("root"),
                span("t-good", "charge", "payment.charge_card").with_parent("root"),
            ],
        )
        .await
        .unwrap();

    assert_eq!(result.violations.len(), 1);
    let v = &result.violations[0];
    assert_eq!(v.rule_id().as_str(), "no-fraud-check");
    assert_eq!(v.trace_ids().len(), 1);
    assert_eq!(v.primary_trace_id().as_str(), "t-bad");
    assert_eq!(v.span_refs().len(), 1);
    assert_eq!(v.span_refs()[0].span_id.as_str(), "charge");
    assert_eq!(v.span_refs()[0].service_name, "payment");
    assert_eq!(sink.by_tenant(&tenant()).len(), 1);
}

// -- Scenario 2: retry storm threshold --------------------------------------

#[tokio::test]
async fn count_threshold_is_strictly_greater() {
    let expr = "trace.count(retry.attempt) > 3";
    assert!(parse_expression(expr).is_ok());

    let engine = Engine::builder().build().unwrap();
    engine.deploy_rules(&tenant(), vec![rule("retry-storm", expr)]).unwrap();

    let mut spans = Vec::new();
    for i in 0..4 {
        spans.push(span("t-four", &format!("s{i}"), "retry.attempt"));
    }
    for i in 0..3 {
        spans.push(span("t-three", &format!("s{i}"), "retry.attempt"));
    }
    let result = engine.insert_batch(&tenant(), spans).await.unwrap();

    assert_eq!(result.violations.len(), 1);
    assert_eq!(result.violations[0].primary_trace_id().as_str(), "t-four");
    assert_eq!(result.violations[0].span_refs().len(), 4);
}

// -- Scenario 3: unclosed parenthesis ---------------------------------------

#[test]
fn unclosed_parenthesis_fails_to_parse() {
    let err = parse_expression("trace.has(unclosed").unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::UnclosedDelimiter);
    assert!(err.message.contains("unclosed parenthesis"));
    assert_eq!(err.offset, 9);

    let engine = Engine::builder().build().unwrap();
    let err = engine
        .deploy_rules(&tenant(), vec![rule("broken", "trace.has(unclosed")])
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Rule(ref e) if matches!(e.root(), RuleError::Parse(_))
    ));
}

// -- Scenario 4 lives in tests/isolation.rs ---------------------------------

// -- Scenario 5: large batch, deterministic result --------------------------

fn ten_rules() -> Vec<RuleDefinition> {
    vec![
        rule("r00", "trace.has(payment.charge_card) and not trace.has(payment.fraud_check)"),
        rule("r01", "trace.count(retry.attempt) > 3"),
        rule("r02", "trace.has(db.query).where(duration > 1000000)"),
        rule("r03", r#"trace.has(http.request).where(status == "ERROR")"#),
        rule("r04", "trace.has(http.request).where(code in [500, 503])"),
        rule("r05", "trace.count(cache.miss) >= 5"),
        rule("r06", "trace.has(auth.login) or trace.has(auth.refresh)"),
        rule("r07", "not trace.has(auth.check) and trace.has(pii.read)"),
        rule("r08", r#"trace.has(db.query).where(statement matches "^DELETE")"#),
        rule("r09", "trace.count(http.request) < 2"),
    ]
}

const OPS: [&str; 10] = [
    "payment.charge_card",
    "payment.fraud_check",
    "retry.attempt",
    "db.query",
    "http.request",
    "cache.miss",
    "auth.login",
    "auth.check",
    "pii.read",
    "checkout.submit",
];

fn thousand_spans() -> Vec<Span> {
    let mut spans = Vec::with_capacity(1_000);
    for i in 0..1_000_u32 {
        let trace = format!("trace-{:02}", i % 50);
        let op = OPS[((i / 50 + i % 7) % 10) as usize];
        let mut s = span(&trace, &format!("span-{i:04}"), op)
            .with_attribute("code", i64::from(if i % 11 == 0 { 503 } else { 200 }))
            .with_attribute(
                "statement",
                if i % 13 == 0 { "DELETE FROM t" } else { "SELECT 1" },
            );
        if i % 17 == 0 {
            s = s.with_status(SpanStatus::Error);
        }
        spans.push(s);
    }
    spans
}

type Signature = BTreeSet<(String, String, Vec<String>)>;

fn signature(result: &tracewarden_engine::FiringResult) -> Signature {
    result
        .violations
        .iter()
        .map(|v| {
            (
                v.rule_id().to_string(),
                v.primary_trace_id().to_string(),
                v.span_refs().iter().map(|r| r.span_id.to_string()).collect(),
            )
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn large_batch_is_bounded_and_order_independent() {
    let config = EngineConfig::default().with_batch_timeout(Duration::from_secs(10));
    let metrics = Arc::new(EngineMetrics::default());

    let forward = Engine::builder()
        .config(config.clone())
        .metrics(metrics.clone() as Arc<dyn MetricsHooks>)
        .build()
        .unwrap();
    forward.deploy_rules(&tenant(), ten_rules()).unwrap();
    let a = forward.insert_batch(&tenant(), thousand_spans()).await.unwrap();

    let backward = Engine::builder().config(config).build().unwrap();
    let mut rules = ten_rules();
    rules.reverse();
    backward.deploy_rules(&tenant(), rules).unwrap();
    let mut spans = thousand_spans();
    spans.reverse();
    let b = backward.insert_batch(&tenant(), spans).await.unwrap();

    assert_eq!(a.traces_evaluated, 50);
    assert_eq!(a.rules_evaluated, 10);
    assert!(!a.violations.is_empty());
    assert_eq!(signature(&a), signature(&b));

    let order: Vec<_> = a
        .violations
        .iter()
        .map(|v| (v.rule_id().clone(), v.primary_trace_id().clone()))
        .collect();
    let mut sorted = order.clone();
    sorted.sort();
    assert_eq!(order, sorted);

    assert_eq!(metrics.snapshot().spans_ingested, 1_000);
    assert_eq!(metrics.snapshot().rule_timeouts, 0);
}

// -- Idempotent firing ------------------------------------------------------

#[tokio::test]
async fn refiring_unchanged_facts_emits_nothing_new() {
    let sink = Arc::new(MemoryViolationSink::new());
    let engine = Engine::builder().sink(sink.clone()).build().unwrap();
    engine.deploy_rules(&tenant(), ten_rules()).unwrap();
    for s in thousand_spans().into_iter().take(200) {
        engine.insert(&tenant(), s).await.unwrap();
    }

    let first = engine.fire_all(&tenant()).await.unwrap();
    assert!(!first.violations.is_empty());
    let published = sink.len();
    assert_eq!(published, first.violations.len());

    let second = engine.fire_all(&tenant()).await.unwrap();
    assert!(second.violations.is_empty());
    assert_eq!(second.suppressed, first.violations.len());
    assert_eq!(sink.len(), published);
}

#[tokio::test]
async fn new_trace_after_firing_is_reported_once() {
    let engine = Engine::builder().build().unwrap();
    engine
        .deploy_rules(&tenant(), vec![rule("r1", "trace.has(payment.charge_card)")])
        .unwrap();
    engine.insert(&tenant(), span("t1", "s1", "payment.charge_card")).await.unwrap();
    assert_eq!(engine.fire_all(&tenant()).await.unwrap().violations.len(), 1);

    engine.insert(&tenant(), span("t2", "s1", "payment.charge_card")).await.unwrap();
    let result = engine.fire_all(&tenant()).await.unwrap();
    assert_eq!(result.violations.len(), 1);
    assert_eq!(result.violations[0].primary_trace_id().as_str(), "t2");
}

// -- Where-clause typing -----------------------------------------------------

#[tokio::test]
async fn ordering_ignores_string_attributes() {
    let engine = Engine::builder().build().unwrap();
    engine
        .deploy_rules(
            &tenant(),
            vec![rule("server-error", "trace.has(http.request).where(code > 400)")],
        )
        .unwrap();

    let result = engine
        .insert_batch(
            &tenant(),
            vec![
                span("t-text", "s1", "http.request").with_attribute("code", "500"),
                span("t-num", "s1", "http.request").with_attribute("code", 500_i64),
            ],
        )
        .await
        .unwrap();

    assert_eq!(result.violations.len(), 1);
    assert_eq!(result.violations[0].primary_trace_id().as_str(), "t-num");
}

// -- Custom matchers ---------------------------------------------------------

/// Matches every trace without citing any span.
#[derive(Debug)]
struct BareMatcher {
    meta: RuleMeta,
}

impl TraceMatcher for BareMatcher {
    fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    fn evaluate(
        &self,
        _trace: &TraceView<'_>,
        _cancel: &CancellationToken,
    ) -> Result<Option<MatchEvidence>, EvalError> {
        Ok(Some(MatchEvidence::default()))
    }
}

#[tokio::test]
async fn custom_match_without_evidence_cites_root_span() {
    let engine = Engine::builder().build().unwrap();
    let def = rule("bare", "trace.has(any.op)");
    let matcher = BareMatcher { meta: def.meta() };
    engine
        .deploy_rule_set(
            &tenant(),
            RuleSet::new(vec![Rule::from_matcher(def, Arc::new(matcher))]),
        )
        .unwrap();

    let result = engine
        .insert_batch(
            &tenant(),
            vec![
                span("t1", "child", "db.query").with_parent("root"),
                span("t1", "root", "checkout.submit"),
            ],
        )
        .await
        .unwrap();

    assert_eq!(result.violations.len(), 1);
    let refs = result.violations[0].span_refs();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].span_id.as_str(), "root");
}
