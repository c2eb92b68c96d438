use tracewarden_core::{Span, TenantId};
use tracewarden_engine::{Engine, EngineConfig, EngineError, FactLimits};
use tracewarden_rules::{RuleDefinition, RuleError};

const NAME_LIMIT: usize = 255;
const DESCRIPTION_LIMIT: usize = 2_000;
const EXPRESSION_LIMIT: usize = 5_000;

fn tenant() -> TenantId {
    TenantId::new("acme")
}

/// A valid expression exactly `len` bytes long.
fn expression_of_len(len: usize) -> String {
    let prefix = "trace.has(svc.";
    let op = "x".repeat(len - prefix.len() - 1);
    format!("{prefix}{op})")
}

fn limit_error(err: EngineError) -> (&'static str, usize, usize) {
    match err {
        EngineError::Rule(e) => match e.root() {
            RuleError::LimitExceeded {
                field,
                limit,
                actual,
            } => (*field, *limit, *actual),
            other => panic!("expected a limit error, got {other}"),
        },
        other => panic!("expected a rule error, got {other}"),
    }
}

#[test]
fn values_exactly_at_the_limit_are_accepted() {
    let engine = Engine::builder().build().unwrap();
    let expr = expression_of_len(EXPRESSION_LIMIT);
    assert_eq!(expr.len(), EXPRESSION_LIMIT);

    let def = RuleDefinition::new("r1", "n".repeat(NAME_LIMIT), expr)
        .with_description("d".repeat(DESCRIPTION_LIMIT));
    let report = engine.deploy_rules(&tenant(), vec![def]).unwrap();
    assert_eq!(report.rules, 1);
}

#[test]
fn one_byte_over_is_rejected_naming_the_limit() {
    let engine = Engine::builder().build().unwrap();
    let ok_expr = "trace.has(payment.charge_card)";

    let err = engine
        .deploy_rules(
            &tenant(),
            vec![RuleDefinition::new("r1", "n".repeat(NAME_LIMIT + 1), ok_expr)],
        )
        .unwrap_err();
    assert!(err.to_string().contains("name exceeds limit of 255 (got 256)"));
    assert_eq!(limit_error(err), ("name", NAME_LIMIT, NAME_LIMIT + 1));

    let err = engine
        .deploy_rules(
            &tenant(),
            vec![
                RuleDefinition::new("r1", "rule", ok_expr)
                    .with_description("d".repeat(DESCRIPTION_LIMIT + 1)),
            ],
        )
        .unwrap_err();
    assert_eq!(
        limit_error(err),
        ("description", DESCRIPTION_LIMIT, DESCRIPTION_LIMIT + 1)
    );

    let err = engine
        .deploy_rules(
            &tenant(),
            vec![RuleDefinition::new("r1", "rule", expression_of_len(EXPRESSION_LIMIT + 1))],
        )
        .unwrap_err();
    assert_eq!(
        limit_error(err),
        ("expression", EXPRESSION_LIMIT, EXPRESSION_LIMIT + 1)
    );
}

#[test]
fn lengths_are_measured_in_bytes() {
    let engine = Engine::builder().build().unwrap();
    // 128 two-byte characters: 256 bytes.
    let name = "é".repeat(128);
    let err = engine
        .deploy_rules(
            &tenant(),
            vec![RuleDefinition::new("r1", name, "trace.has(payment.charge_card)")],
        )
        .unwrap_err();
    assert_eq!(limit_error(err), ("name", NAME_LIMIT, 256));
}

#[tokio::test]
async fn fact_limits_apply_at_the_boundary() {
    let engine = Engine::builder()
        .config(EngineConfig::default().with_fact_limits(FactLimits {
            max_attributes_per_span: 2,
            max_attribute_value_len: 8,
            ..FactLimits::default()
        }))
        .build()
        .unwrap();

    let at_limit = Span::new("acme", "t1", "s1", "db.query", "store")
        .with_attribute("a", "12345678")
        .with_attribute("b", 1_i64);
    assert!(engine.insert(&tenant(), at_limit).await.is_ok());

    let over = Span::new("acme", "t1", "s2", "db.query", "store").with_attribute("a", "123456789");
    let err = engine.insert(&tenant(), over).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "attribute value length exceeds limit of 8 (got 9)"
    );
    assert_eq!(engine.session(&tenant()).fact_count().await, 1);
}
