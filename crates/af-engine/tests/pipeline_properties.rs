use std::io::Write;
use std::sync::Arc;

use af_columnar::Column;
use af_engine::repair::EMPTY_SERIES_MESSAGE;
use af_engine::{
    CodeMap, Dataset, DatasetSchema, DisplayValue, EngineError, FailureKind, GeneratorError,
    Pipeline, Reply, sanitize,
};
use af_frame::DataFrame;
use af_runtime::{DecisionAction, IssueKind, RuntimePolicy};
use af_types::Scalar;
use proptest::prelude::*;

fn regions() -> Dataset {
    let frame = DataFrame::from_columns(vec![
        (
            "customer_state".to_owned(),
            Column::from_values(vec!["SP".into(), "SP".into(), "RJ".into()]).expect("state"),
        ),
        (
            "payment_value".to_owned(),
            Column::from_values(vec![
                Scalar::Float64(100.0),
                Scalar::Float64(50.0),
                Scalar::Float64(200.0),
            ])
            .expect("revenue"),
        ),
    ])
    .expect("frame");
    Dataset::from_frame(frame)
}

fn pipeline(policy: RuntimePolicy) -> Pipeline {
    Pipeline::new(regions(), policy, CodeMap::default())
}

fn answered(reply: &Reply) -> &DisplayValue {
    match reply {
        Reply::Answered(display) => display,
        Reply::Failed(failure) => panic!("unexpected failure: {failure:?}"),
    }
}

#[test]
fn names_outside_the_bindings_fail_and_leave_the_dataset_alone() {
    let pipeline = pipeline(RuntimePolicy::default());
    let before = pipeline.dataset().frame().as_ref().clone();
    for raw in ["__import__('os')", "eval('1')", "df.to_csv('x.csv')", "df.__dict__"] {
        let answer = pipeline.run(raw);
        let Reply::Failed(failure) = &answer.reply else {
            panic!("{raw} should fail");
        };
        assert_eq!(failure.kind, FailureKind::GeneralRuntimeError, "{raw}");
        assert!(failure.sandbox_violation, "{raw}");
        assert!(answer.reply.render_plain().starts_with("Disallowed operation: "));
        assert!(!answer.repair_attempted);
    }
    assert_eq!(pipeline.dataset().frame().as_ref(), &before);
}

#[test]
fn grouped_top_region_needs_no_repair() {
    let pipeline = pipeline(RuntimePolicy::default());

    let answer = pipeline.run("df.groupby('customer_state')['payment_value'].sum().idxmax()");
    assert_eq!(answered(&answer.reply), &DisplayValue::Text("Rio de Janeiro".into()));
    assert!(!answer.repair_attempted);
    assert!(answer.ledger.records().is_empty());

    let answer = pipeline.run("df.groupby('customer_state').size().idxmax()");
    assert_eq!(answered(&answer.reply), &DisplayValue::Text("São Paulo".into()));
    assert!(!answer.repair_attempted);
}

#[test]
fn empty_filter_is_repaired_into_the_empty_sentinel() {
    let pipeline = pipeline(RuntimePolicy::default());
    let answer = pipeline.run(
        "```python\ndf[df['payment_value'] > 1000]\\\n.groupby('customer_state')['payment_value'].sum().idxmax()\n```",
    );
    assert_eq!(
        answer.expression,
        "df[df['payment_value'] > 1000] .groupby('customer_state')['payment_value'].sum().idxmax()"
    );
    assert_eq!(
        answered(&answer.reply),
        &DisplayValue::Empty(EMPTY_SERIES_MESSAGE.into())
    );
    assert!(answer.repair_attempted);
    assert_eq!(
        answer.reply.render_plain(),
        format!("No data: {EMPTY_SERIES_MESSAGE}")
    );
    assert_eq!(answer.ledger.count(DecisionAction::Repair), 1);
    assert_eq!(answer.ledger.count(DecisionAction::Allow), 1);
}

#[test]
fn empty_series_extremum_is_repaired() {
    let pipeline = pipeline(RuntimePolicy::default());
    let answer = pipeline.run("df['payment_value'][df['customer_state'] == 'AC'].idxmax()");
    assert_eq!(
        answered(&answer.reply),
        &DisplayValue::Empty(EMPTY_SERIES_MESSAGE.into())
    );
}

#[test]
fn strict_policy_reports_the_original_failure() {
    let pipeline = pipeline(RuntimePolicy::strict());
    let answer =
        pipeline.run("df[df['payment_value'] > 1000].groupby('customer_state')['payment_value'].sum().idxmax()");
    let Reply::Failed(failure) = &answer.reply else {
        panic!("strict mode must not repair");
    };
    assert_eq!(failure.kind, FailureKind::ExtremumOnEmpty);
    assert_eq!(failure.message, "attempt to get argmax of an empty sequence");
    assert!(!answer.repair_attempted);
    let record = answer.ledger.last().expect("decision");
    assert_eq!(record.issue.kind, IssueKind::ExtremumOnEmpty);
    assert_eq!(record.action, DecisionAction::Reject);
}

#[test]
fn nested_extremum_is_a_general_failure() {
    let pipeline = pipeline(RuntimePolicy::default());
    let answer = pipeline.run(
        "df[df['payment_value'] > 1000]['payment_value'].loc[df['payment_value'].idxmax()].idxmax()",
    );
    let Reply::Failed(failure) = &answer.reply else {
        panic!("nested extremum must fail");
    };
    assert_eq!(failure.kind, FailureKind::GeneralRuntimeError);
    assert!(failure.message.starts_with("Fallback not applicable: "));
}

#[test]
fn empty_minimum_keeps_its_own_message() {
    let pipeline = pipeline(RuntimePolicy::default());
    for (raw, op) in [
        ("df[df['payment_value'] > 1000]['payment_value'].idxmin()", "argmin"),
        ("df[df['payment_value'] > 1000]['payment_value'].argmin()", "argmin"),
    ] {
        let answer = pipeline.run(raw);
        let Reply::Failed(failure) = &answer.reply else {
            panic!("{raw} should fail");
        };
        assert_eq!(failure.kind, FailureKind::GeneralRuntimeError, "{raw}");
        assert_eq!(
            failure.message,
            format!("attempt to get {op} of an empty sequence")
        );
        assert!(!answer.repair_attempted, "{raw}");
        assert!(answer.ledger.records().is_empty(), "{raw}");
    }
}

#[test]
fn long_chains_fail_cleanly_on_a_default_stack_thread() {
    let pipeline = Arc::new(pipeline(RuntimePolicy::default()));
    let inputs = vec![
        format!("df{}", ".head()".repeat(100)),
        vec!["1"; 1_500].join("+"),
        format!("{}df['payment_value'].sum()", "-".repeat(500)),
        format!("df.query({:?})", vec!["payment_value"; 40].join(" + ")),
    ];
    let worker = {
        let pipeline = Arc::clone(&pipeline);
        std::thread::spawn(move || {
            inputs
                .iter()
                .map(|raw| pipeline.run(raw).reply)
                .collect::<Vec<_>>()
        })
    };
    let replies = worker.join().expect("worker thread finished");
    for reply in replies {
        let Reply::Failed(failure) = reply else {
            panic!("deep input should fail");
        };
        assert_eq!(failure.kind, FailureKind::GeneralRuntimeError);
        assert_eq!(failure.message, "expression nested too deeply");
    }

    let shallow = std::thread::spawn(move || {
        pipeline
            .run(&format!("df{}", ".head()".repeat(10)))
            .reply
    })
    .join()
    .expect("worker thread finished");
    assert!(matches!(shallow, Reply::Answered(DisplayValue::Table(_))));
}

#[test]
fn quarter_arithmetic_is_rewritten_before_evaluation() {
    let frame = DataFrame::from_columns(vec![(
        "order_purchase_timestamp".to_owned(),
        Column::from_values(vec![Scalar::Timestamp(
            af_types::parse_timestamp("2018-08-29 15:00:00").expect("ts"),
        )])
        .expect("ts"),
    )])
    .expect("frame");
    let pipeline = Pipeline::new(
        Dataset::from_frame(frame),
        RuntimePolicy::default(),
        CodeMap::default(),
    );
    let answer = pipeline.run("df['order_purchase_timestamp'].max().to_period('Q') - 1");
    assert_eq!(answer.expression, "df['order_purchase_timestamp'].max().to_period('Q')");
    assert_eq!(answered(&answer.reply).render_plain(), "2018Q3");
}

#[test]
fn ask_drives_the_generator_with_the_prompt_contract() {
    let pipeline = pipeline(RuntimePolicy::default());
    let generator = |prompt: &str| -> Result<String, GeneratorError> {
        assert!(prompt.contains("customer_state, payment_value"));
        assert!(prompt.contains("\"\"\"Top state by revenue?\"\"\""));
        Ok("df.groupby('customer_state')['payment_value'].sum().nlargest(1).index[0]".into())
    };
    let answer = pipeline
        .ask("Top state by revenue?", &generator)
        .expect("answer");
    assert_eq!(answered(&answer.reply), &DisplayValue::Text("Rio de Janeiro".into()));

    let silent = |_: &str| -> Result<String, GeneratorError> { Ok("```\n```".into()) };
    assert!(matches!(
        pipeline.ask("anything", &silent),
        Err(EngineError::Generator(GeneratorError::Empty))
    ));
    let offline = |_: &str| -> Result<String, GeneratorError> {
        Err(GeneratorError::Unavailable("no network".into()))
    };
    assert!(pipeline.ask("anything", &offline).is_err());
}

#[test]
fn queries_run_concurrently_over_one_dataset() {
    let pipeline = Arc::new(pipeline(RuntimePolicy::default()));
    let expressions = [
        "df['payment_value'].sum()",
        "df.groupby('customer_state')['payment_value'].sum().idxmax()",
        "df[df['payment_value'] > 1000]['payment_value'].idxmax()",
        "open('x')",
    ];
    std::thread::scope(|scope| {
        for worker in 0..8 {
            let pipeline = Arc::clone(&pipeline);
            scope.spawn(move || {
                for round in 0..25 {
                    let raw = expressions[(worker + round) % expressions.len()];
                    let answer = pipeline.run(raw);
                    let expected = pipeline.run(raw);
                    assert_eq!(answer.reply, expected.reply, "{raw}");
                }
            });
        }
    });
    assert_eq!(pipeline.dataset().len(), 3);
}

#[test]
fn pipeline_loads_from_config_and_reports_kpis() {
    let dir = tempfile::tempdir().expect("tempdir");
    let csv_path = dir.path().join("olist.csv");
    let mut csv = std::fs::File::create(&csv_path).expect("csv");
    writeln!(
        csv,
        "order_id,customer_state,payment_value,review_score,order_purchase_timestamp,category_name_en"
    )
    .expect("write");
    writeln!(csv, "o1,SP,100,5,2018-06-01 10:00:00,toys").expect("write");
    writeln!(csv, "o2,RJ,200,3,2018-08-15 09:30:00,toys").expect("write");
    writeln!(csv, "o2,RJ,50,4,2018-08-15 09:30:00,garden_tools").expect("write");

    let config_path = dir.path().join("askframe.json");
    std::fs::write(
        &config_path,
        format!(
            "{{\"dataset_path\": {:?}, \"code_map_overrides\": {{\"RJ\": \"Rio\"}}}}",
            csv_path.display().to_string()
        ),
    )
    .expect("config");

    let config = af_engine::PipelineConfig::load(&config_path).expect("config");
    let pipeline = Pipeline::from_config(&config).expect("pipeline");
    let kpis = pipeline.kpis().expect("kpis");
    assert_eq!(kpis.total_orders, Some(2));
    assert_eq!(kpis.total_revenue, Some(350.0));
    assert_eq!(kpis.average_review_score, Some(4.0));

    let answer = pipeline.run(
        "df[df['order_purchase_timestamp'] >= df['order_purchase_timestamp'].max() - pd.DateOffset(months=3)]\
         .groupby('customer_state')['payment_value'].sum().idxmax()",
    );
    assert_eq!(answered(&answer.reply), &DisplayValue::Text("Rio".into()));

    let answer = pipeline.run("df.groupby('category_name_en')['payment_value'].sum()");
    let DisplayValue::Series(series) = answered(&answer.reply) else {
        panic!("expected a series");
    };
    assert_eq!(series.len(), 2);

    let schema_err = Dataset::load(&config_path, &DatasetSchema::olist()).expect_err("not csv");
    assert!(matches!(schema_err, EngineError::DatasetLoad { .. }));
}

proptest! {
    #[test]
    fn sanitize_is_idempotent(raw in "(\\PC|\n|\r|`|\\\\){0,80}") {
        let once = sanitize(&raw);
        prop_assert_eq!(sanitize(&once), once.clone());
        prop_assert!(!once.contains('`'));
        prop_assert!(!once.contains('\n'));
    }

    #[test]
    fn sanitize_is_idempotent_around_quarter_rewrites(
        prefix in "[a-z\\[\\]'.() ]{0,12}",
        repeats in 1_usize..4,
        quote in "['\"]",
    ) {
        let fragment = format!(".to_period({quote}Q{quote}) - 1");
        let raw = format!("{prefix}{}", fragment.repeat(repeats));
        let once = sanitize(&raw);
        prop_assert_eq!(sanitize(&once), once.clone());
    }

    #[test]
    fn pipeline_never_panics_on_generated_text(raw in "[dfpn.\\[\\]()'_a-z0-9 <>=&|~+*/-]{0,60}") {
        let pipeline = pipeline(RuntimePolicy::hardened(Some(20_000)));
        let _ = pipeline.run(&raw);
    }
}
