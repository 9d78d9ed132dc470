use trel_planner::{
    col, lit, raw, CollisionPolicy, ColumnDefinition, Connection, EngineType, JoinKind, JoinOn,
    Relation, SchemaCache, StringCapable, TypedExpr, Window,
};
use trel_common::TrelError;

fn id_name(conn: &Connection, table: &str) -> Relation {
    Relation::from_table(
        &conn.downgrade(),
        table,
        SchemaCache::try_from_columns([
            ColumnDefinition::new("id", EngineType::Integer),
            ColumnDefinition::new("name", EngineType::Varchar),
        ])
        .expect("schema"),
    )
    .expect("relation")
}

#[test]
fn strict_keep_reports_missing_and_soft_keep_drops_it() {
    let conn = Connection::open();
    let r = id_name(&conn, "people");

    let err = r.keep(["id", "missing"]).expect_err("strict keep");
    match &err {
        TrelError::MissingColumns { operation, missing } => {
            assert_eq!(operation, "keep");
            assert_eq!(missing.len(), 1);
            assert_eq!(missing[0].column, "missing");
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(err.to_string().contains("'missing'"), "{err}");

    let kept = r.keep_if_exists(["id", "missing"]).expect("soft keep");
    assert_eq!(kept.columns(), vec!["id"]);
    assert_eq!(
        kept.schema().get("id").map(|c| c.engine_type()),
        Some(&EngineType::Integer)
    );
}

#[test]
fn natural_left_join_requires_collision_allowance() {
    let conn = Connection::open();
    let (a, b) = (id_name(&conn, "a"), id_name(&conn, "b"));

    let err = a
        .join(&b, JoinKind::Left, JoinOn::Natural)
        .expect_err("collision");
    match err {
        TrelError::NameConflict { names, .. } => assert!(names.iter().any(|n| n == "name")),
        other => panic!("unexpected error {other}"),
    }

    let joined = a
        .join_with(&b, JoinKind::Left, JoinOn::Natural, CollisionPolicy::suffix("_right"))
        .expect("allowed collisions");
    assert!(joined.schema().contains("name"));
    assert!(joined.schema().contains("name_right"));
}

#[test]
fn combinators_union_dependencies() {
    let a = col("a");
    let b = col("b");
    let c = col("c");
    let cases: Vec<TypedExpr> = vec![
        a.plus(&b).expect("plus"),
        a.minus(&b).expect("minus"),
        a.times(&b).expect("times"),
        a.divide(&b).expect("divide"),
        a.modulo(&b).expect("modulo"),
        a.pow(&b).expect("pow"),
        a.equals(&b).expect("eq"),
        a.lt(&b).expect("lt"),
        a.gt_eq(&b).expect("gt_eq"),
        a.and(&b).expect("and"),
        a.or(&b).expect("or"),
        a.concat(&b).expect("concat"),
    ];
    for e in cases {
        assert_eq!(
            e.dependencies().iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["a", "b"],
            "{}",
            e.sql()
        );
    }

    let windowed = a
        .max()
        .over(&Window::new().partition_by([b.clone()]).order_by([c.desc()]))
        .expect("over");
    assert_eq!(windowed.dependencies().len(), 3);

    let aliased = a.plus(&lit(1)).expect("plus").alias("a1");
    assert_eq!(aliased.dependencies().len(), 1);
    assert_eq!(aliased.result_type(), &EngineType::Unknown);
}

#[test]
fn explicit_types_mismatch_but_unknown_never_fails() {
    let flag = TypedExpr::column("flag", EngineType::Boolean);
    let day = TypedExpr::column("day", EngineType::Date);
    assert!(matches!(
        flag.lt(&day).expect_err("bool vs date"),
        TrelError::TypeMismatch { .. }
    ));
    assert!(flag.lt(&raw("now()", Vec::<String>::new())).is_ok());
    assert!(day.plus(&col("offset")).is_ok());
}

#[test]
fn pipelines_compose_without_touching_sources() {
    let conn = Connection::open();
    let r = id_name(&conn, "people");
    let before = r.schema().clone();

    let shaped = r
        .add([r
            .col("name")
            .expect("name")
            .as_string()
            .expect("string")
            .upper()
            .alias("shout")])
        .and_then(|x| x.filter(&x.col("id").expect("id").gt(&lit(10)).expect("gt")))
        .and_then(|x| x.order_by([col("shout").desc()]))
        .and_then(|x| x.limit(5, 0))
        .expect("pipeline");

    assert_eq!(shaped.columns(), vec!["id", "name", "shout"]);
    assert_eq!(r.schema(), &before);
    assert!(shaped.sql().contains("upper(\"name\") AS \"shout\""), "{}", shaped.sql());
}
