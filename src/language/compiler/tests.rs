use super::*;
use crate::language::ast::{BinaryOp, TypeExpr};
use crate::runtime::{Interpreter, LoadError};
use std::thread;

fn ident(name: &str) -> ast::Expr {
    ast::Expr::ident(name)
}

fn int(value: i128) -> ast::Expr {
    ast::Expr::int(value)
}

fn ty(name: &str) -> TypeExpr {
    TypeExpr::named(name)
}

fn binary(op: BinaryOp, left: ast::Expr, right: ast::Expr) -> ast::Expr {
    ast::Expr::binary(op, left, right)
}

fn call(name: &str, args: Vec<ast::Expr>) -> ast::Expr {
    ast::Expr::call(ident(name), args)
}

fn param(name: &str, ty: TypeExpr) -> ast::Param {
    ast::Param {
        name: Some(name.to_string()),
        ty,
        span: Span::default(),
    }
}

fn result(ty: TypeExpr) -> ast::Param {
    ast::Param {
        name: None,
        ty,
        span: Span::default(),
    }
}

fn func(name: &str, params: Vec<ast::Param>, results: Vec<ast::Param>, body: Vec<ast::Stmt>) -> ast::Decl {
    ast::Decl::Func(ast::FuncDecl {
        name: name.to_string(),
        params,
        results,
        variadic: false,
        body: ast::Block::new(body),
        span: Span::default(),
    })
}

fn named_type(name: &str, underlying: TypeExpr) -> ast::Decl {
    ast::Decl::Type(ast::TypeDecl {
        name: name.to_string(),
        ty: underlying,
        span: Span::default(),
    })
}

fn for_loop(
    init: Option<ast::Stmt>,
    condition: Option<ast::Expr>,
    post: Option<ast::Stmt>,
    body: Vec<ast::Stmt>,
) -> ast::Stmt {
    ast::Stmt::For(ast::ForStmt {
        init: init.map(Box::new),
        condition,
        post: post.map(Box::new),
        body: ast::Block::new(body),
        span: Span::default(),
    })
}

fn range(key: Option<&str>, value: Option<&str>, expr: ast::Expr, body: Vec<ast::Stmt>) -> ast::Stmt {
    ast::Stmt::Range(ast::RangeStmt {
        key: key.map(ast::Identifier::new),
        value: value.map(ast::Identifier::new),
        expr,
        body: ast::Block::new(body),
        span: Span::default(),
    })
}

fn if_then(condition: ast::Expr, then: Vec<ast::Stmt>) -> ast::Stmt {
    ast::Stmt::If(ast::IfStmt {
        init: None,
        condition,
        then_branch: ast::Block::new(then),
        else_branch: None,
        span: Span::default(),
    })
}

fn case(values: Vec<ast::Expr>, body: Vec<ast::Stmt>) -> ast::CaseClause {
    ast::CaseClause {
        values,
        body,
        span: Span::default(),
    }
}

fn chan_of(dir: ChanDir, elem: TypeExpr) -> TypeExpr {
    TypeExpr::chan(dir, elem)
}

fn make_chan(elem: &str, cap: i128) -> ast::Expr {
    ast::Expr::make(chan_of(ChanDir::Both, ty(elem)), vec![int(cap)])
}

fn file(decls: Vec<ast::Decl>) -> ast::File {
    ast::File {
        package: "main".to_string(),
        imports: Vec::new(),
        decls,
    }
}

fn load_with(config: EngineConfig, decls: Vec<ast::Decl>) -> Interpreter {
    let mut interp = Interpreter::new(config);
    interp.load(&file(decls)).expect("program compiles");
    interp
}

fn load(decls: Vec<ast::Decl>) -> Interpreter {
    load_with(EngineConfig::default(), decls)
}

fn compile_errors(decls: Vec<ast::Decl>) -> Vec<String> {
    match Interpreter::default().load(&file(decls)) {
        Ok(()) => Vec::new(),
        Err(LoadError::Compile(errors)) => errors.messages().into_iter().map(String::from).collect(),
        Err(other) => panic!("unexpected load failure: {other}"),
    }
}

fn as_int(value: &Value) -> i64 {
    match value {
        Value::Int(n) => *n,
        other => panic!("expected int, found {}", other.describe()),
    }
}

fn compiler(config: EngineConfig) -> Compiler {
    Compiler::new(Arc::new(Universe::new()), config, Packages::new())
}

/// `func roundTrip() int { ch := make(chan T, 1); ch <- 7; x := <-ch; return int(x) }`
fn round_trip_program(elem: &str) -> Vec<ast::Decl> {
    vec![
        named_type("MyInt", ty("int")),
        func(
            "roundTrip",
            vec![],
            vec![result(ty("int"))],
            vec![
                ast::Stmt::define(&["ch"], vec![make_chan(elem, 1)]),
                ast::Stmt::send(ident("ch"), int(7)),
                ast::Stmt::define(&["x"], vec![ast::Expr::recv(ident("ch"))]),
                ast::Stmt::ret(vec![call("int", vec![ident("x")])]),
            ],
        ),
    ]
}

#[test]
fn receive_and_send_respect_channel_direction() {
    for kind in Kind::SCALARS {
        let elem = ty(kind.name());
        let errors = compile_errors(vec![
            func(
                "recvFromSendOnly",
                vec![param("ch", chan_of(ChanDir::Send, elem.clone()))],
                vec![],
                vec![ast::Stmt::expr(ast::Expr::recv(ident("ch")))],
            ),
            func(
                "sendToRecvOnly",
                vec![
                    param("ch", chan_of(ChanDir::Recv, elem.clone())),
                    param("v", elem.clone()),
                ],
                vec![],
                vec![ast::Stmt::send(ident("ch"), ident("v"))],
            ),
            func(
                "bidirectional",
                vec![
                    param("ch", chan_of(ChanDir::Both, elem.clone())),
                    param("v", elem.clone()),
                ],
                vec![],
                vec![
                    ast::Stmt::send(ident("ch"), ident("v")),
                    ast::Stmt::expr(ast::Expr::recv(ident("ch"))),
                ],
            ),
        ]);
        let name = kind.name();
        assert_eq!(errors.len(), 2, "{name}: {errors:?}");
        assert!(
            errors.contains(&format!(
                "invalid operation: <-ch (cannot receive from send-only channel chan<- {name})"
            )),
            "{name}: {errors:?}"
        );
        assert!(
            errors.contains(&format!(
                "invalid operation: cannot send to receive-only channel type <-chan {name}: ch"
            )),
            "{name}: {errors:?}"
        );
    }
}

#[test]
fn channel_operations_on_non_channels_are_rejected() {
    let errors = compile_errors(vec![func(
        "f",
        vec![param("x", ty("int"))],
        vec![],
        vec![
            ast::Stmt::expr(ast::Expr::recv(ident("x"))),
            ast::Stmt::send(ident("x"), int(1)),
        ],
    )]);
    assert_eq!(
        errors,
        vec![
            "invalid operation: <-x (expecting channel, found int)".to_string(),
            "invalid operation: cannot send to non-channel type int: x".to_string(),
        ]
    );
}

#[test]
fn fast_path_requires_exact_basic_element_type() {
    let mut compiler = compiler(EngineConfig::default());
    let int_ty = compiler.universe.int_type();
    let my_int = compiler.universe.named(Some("main"), "MyInt", &int_ty);
    let native = compiler.universe.chan_of(ChanDir::Both, &int_ty);
    let user = compiler.universe.chan_of(ChanDir::Recv, &my_int);
    compiler.declare_var("native", native, Span::default()).unwrap();
    compiler.declare_var("user", user, Span::default()).unwrap();

    let recv = compiler.compile_expr(&ast::Expr::recv(ident("native"))).unwrap();
    assert_eq!(recv.tier, Some(Tier::Native { dir: ChanDir::Both }));
    assert!(matches!(recv.fun, ExprFun::Int(_)));
    assert!(recv.comma_ok.is_some());

    let send = compiler.compile_send(&ident("native"), &int(3), Span::default()).unwrap();
    assert_eq!(send.tier, Some(Tier::Native { dir: ChanDir::Both }));

    let recv = compiler.compile_expr(&ast::Expr::recv(ident("user"))).unwrap();
    assert_eq!(recv.tier, Some(Tier::Reflective));
    assert_eq!(recv.ty.as_ref().map(Type::is_basic), Some(false));
}

#[test]
fn disabled_fast_path_compiles_reflective_operations() {
    let config = EngineConfig {
        native_fast_path: false,
        ..EngineConfig::default()
    };
    let mut compiler = compiler(config);
    let int_ty = compiler.universe.int_type();
    let chan = compiler.universe.chan_of(ChanDir::Both, &int_ty);
    compiler.declare_var("ch", chan, Span::default()).unwrap();
    let recv = compiler.compile_expr(&ast::Expr::recv(ident("ch"))).unwrap();
    assert_eq!(recv.tier, Some(Tier::Reflective));
    let send = compiler.compile_send(&ident("ch"), &int(1), Span::default()).unwrap();
    assert_eq!(send.tier, Some(Tier::Reflective));
}

#[test]
fn both_tiers_round_trip_the_same_value() {
    let disabled = EngineConfig {
        native_fast_path: false,
        ..EngineConfig::default()
    };
    for elem in ["int", "MyInt"] {
        for config in [EngineConfig::default(), disabled.clone()] {
            let interp = load_with(config, round_trip_program(elem));
            let values = interp.call("roundTrip", Vec::new()).unwrap();
            assert_eq!(as_int(&values[0]), 7, "{elem}");
        }
    }
}

#[test]
fn closed_and_drained_channel_yields_zero_and_false() {
    for elem in ["int", "MyInt"] {
        let interp = load(vec![
            named_type("MyInt", ty("int")),
            func(
                "drained",
                vec![],
                vec![result(ty(elem)), result(ty("bool"))],
                vec![
                    ast::Stmt::define(&["ch"], vec![make_chan(elem, 1)]),
                    ast::Stmt::send(ident("ch"), int(4)),
                    ast::Stmt::expr(call("close", vec![ident("ch")])),
                    ast::Stmt::define(&["first", "ok"], vec![ast::Expr::recv(ident("ch"))]),
                    ast::Stmt::define(&["v", "more"], vec![ast::Expr::recv(ident("ch"))]),
                    if_then(
                        ident("ok"),
                        vec![ast::Stmt::ret(vec![ident("v"), ident("more")])],
                    ),
                    ast::Stmt::ret(vec![ident("first"), ident("ok")]),
                ],
            ),
        ]);
        let values = interp.call("drained", Vec::new()).unwrap();
        assert_eq!(as_int(&values[0]), 0, "{elem}");
        assert!(matches!(values[1], Value::Bool(false)), "{elem}");
    }
}

#[test]
fn loop_post_statement_runs_once_per_iteration() {
    let interp = load(vec![func(
        "sum",
        vec![param("n", ty("int"))],
        vec![result(ty("int"))],
        vec![
            ast::Stmt::define(&["s"], vec![int(0)]),
            for_loop(
                Some(ast::Stmt::define(&["i"], vec![int(0)])),
                Some(binary(BinaryOp::Lt, ident("i"), ident("n"))),
                Some(ast::Stmt::inc(ident("i"))),
                vec![ast::Stmt::op_assign(ident("s"), BinaryOp::Add, ident("i"))],
            ),
            ast::Stmt::ret(vec![ident("s")]),
        ],
    )]);
    let (values, profile) = interp.call_profiled("sum", vec![Value::Int(10)]).unwrap();
    assert_eq!(as_int(&values[0]), 45);
    assert_eq!(profile.counts_for(Op::Post), vec![10]);
    assert_eq!(profile.counts_for(Op::Return), vec![1, 0]);
}

#[test]
fn break_and_continue_target_the_innermost_loop() {
    // for i := 0; ; i++ { if i == 7 { break }; if i%2 == 0 { continue }; s += i }
    let interp = load(vec![func(
        "odds",
        vec![],
        vec![result(ty("int"))],
        vec![
            ast::Stmt::define(&["s"], vec![int(0)]),
            for_loop(
                Some(ast::Stmt::define(&["i"], vec![int(0)])),
                None,
                Some(ast::Stmt::inc(ident("i"))),
                vec![
                    if_then(
                        binary(BinaryOp::Eq, ident("i"), int(7)),
                        vec![ast::Stmt::Break(Span::default())],
                    ),
                    if_then(
                        binary(BinaryOp::Eq, binary(BinaryOp::Rem, ident("i"), int(2)), int(0)),
                        vec![ast::Stmt::Continue(Span::default())],
                    ),
                    ast::Stmt::op_assign(ident("s"), BinaryOp::Add, ident("i")),
                ],
            ),
            ast::Stmt::ret(vec![ident("s")]),
        ],
    )]);
    let values = interp.call("odds", Vec::new()).unwrap();
    assert_eq!(as_int(&values[0]), 1 + 3 + 5);
}

#[test]
fn branch_outside_loop_is_an_error() {
    let errors = compile_errors(vec![func(
        "f",
        vec![],
        vec![],
        vec![
            ast::Stmt::Break(Span::default()),
            ast::Stmt::Continue(Span::default()),
        ],
    )]);
    assert_eq!(
        errors,
        vec![
            "break is not in a loop, switch, or select".to_string(),
            "continue is not in a loop".to_string(),
        ]
    );
}

#[test]
fn range_over_channel_stops_after_close_and_drain() {
    let interp = load(vec![func(
        "total",
        vec![],
        vec![result(ty("int"))],
        vec![
            ast::Stmt::define(&["ch"], vec![make_chan("int", 3)]),
            ast::Stmt::send(ident("ch"), int(1)),
            ast::Stmt::send(ident("ch"), int(2)),
            ast::Stmt::send(ident("ch"), int(3)),
            ast::Stmt::expr(call("close", vec![ident("ch")])),
            ast::Stmt::define(&["s"], vec![int(0)]),
            range(
                Some("v"),
                None,
                ident("ch"),
                vec![ast::Stmt::op_assign(ident("s"), BinaryOp::Add, ident("v"))],
            ),
            ast::Stmt::ret(vec![ident("s")]),
        ],
    )]);
    let values = interp.call("total", Vec::new()).unwrap();
    assert_eq!(as_int(&values[0]), 6);
}

#[test]
fn range_over_string_visits_runes() {
    let interp = load(vec![func(
        "runes",
        vec![],
        vec![result(ty("int")), result(ty("int"))],
        vec![
            ast::Stmt::define(&["n", "last"], vec![int(0), int(0)]),
            range(
                Some("i"),
                None,
                ast::Expr::string("héllo"),
                vec![
                    ast::Stmt::inc(ident("n")),
                    ast::Stmt::assign(ident("last"), ident("i")),
                ],
            ),
            ast::Stmt::ret(vec![ident("n"), ident("last")]),
        ],
    )]);
    let values = interp.call("runes", Vec::new()).unwrap();
    assert_eq!(as_int(&values[0]), 5);
    // byte offset of the final 'o'
    assert_eq!(as_int(&values[1]), 5);
}

#[test]
fn closures_capture_per_iteration_variables() {
    let thunk = TypeExpr::Func {
        params: Vec::new(),
        results: vec![ty("int")],
        variadic: false,
        span: Span::default(),
    };
    let capture = ast::Expr::FuncLit(Box::new(ast::FuncLit {
        params: Vec::new(),
        results: vec![result(ty("int"))],
        variadic: false,
        body: ast::Block::new(vec![ast::Stmt::ret(vec![ident("i")])]),
        span: Span::default(),
    }));
    let invoke = |idx: i128| ast::Expr::call(ast::Expr::index(ident("fs"), int(idx)), Vec::new());
    let interp = load(vec![func(
        "captured",
        vec![],
        vec![result(ty("int"))],
        vec![
            ast::Stmt::define(&["fs"], vec![ast::Expr::make(TypeExpr::slice(thunk), vec![int(0)])]),
            range(
                Some("i"),
                None,
                int(3),
                vec![ast::Stmt::assign(
                    ident("fs"),
                    call("append", vec![ident("fs"), capture]),
                )],
            ),
            ast::Stmt::ret(vec![binary(
                BinaryOp::Add,
                binary(BinaryOp::Mul, invoke(1), int(10)),
                binary(BinaryOp::Mul, invoke(2), int(100)),
            )]),
        ],
    )]);
    let values = interp.call("captured", Vec::new()).unwrap();
    assert_eq!(as_int(&values[0]), 10 + 200);
}

#[test]
fn switch_picks_first_matching_case_or_default() {
    let sign = |n: i64| {
        let interp = load(vec![func(
            "sign",
            vec![param("n", ty("int"))],
            vec![result(ty("int"))],
            vec![
                ast::Stmt::define(&["r"], vec![int(0)]),
                ast::Stmt::Switch(ast::SwitchStmt {
                    init: None,
                    tag: None,
                    clauses: vec![
                        case(
                            vec![binary(BinaryOp::Lt, ident("n"), int(0))],
                            vec![ast::Stmt::assign(ident("r"), int(-1))],
                        ),
                        case(vec![], vec![ast::Stmt::assign(ident("r"), int(1))]),
                        case(
                            vec![binary(BinaryOp::Eq, ident("n"), int(0))],
                            vec![ast::Stmt::Break(Span::default()), ast::Stmt::assign(ident("r"), int(9))],
                        ),
                    ],
                    span: Span::default(),
                }),
                ast::Stmt::ret(vec![ident("r")]),
            ],
        )]);
        as_int(&interp.call("sign", vec![Value::Int(n)]).unwrap()[0])
    };
    assert_eq!(sign(-4), -1);
    assert_eq!(sign(0), 0);
    assert_eq!(sign(12), 1);
}

#[test]
fn tagged_switch_compares_against_each_value() {
    let interp = load(vec![func(
        "bucket",
        vec![param("n", ty("int"))],
        vec![result(ty("string"))],
        vec![ast::Stmt::Switch(ast::SwitchStmt {
            init: None,
            tag: Some(ident("n")),
            clauses: vec![
                case(
                    vec![int(1), int(2)],
                    vec![ast::Stmt::ret(vec![ast::Expr::string("small")])],
                ),
                case(vec![int(3)], vec![ast::Stmt::ret(vec![ast::Expr::string("three")])]),
                case(vec![], vec![ast::Stmt::ret(vec![ast::Expr::string("other")])]),
            ],
            span: Span::default(),
        })],
    )]);
    let bucket = |n| interp.call("bucket", vec![Value::Int(n)]).unwrap()[0].to_string();
    assert_eq!(bucket(2), "small");
    assert_eq!(bucket(3), "three");
    assert_eq!(bucket(8), "other");
}

#[test]
fn map_entries_support_assignment_and_comma_ok() {
    let interp = load(vec![func(
        "lookup",
        vec![],
        vec![result(ty("int")), result(ty("bool"))],
        vec![
            ast::Stmt::define(
                &["m"],
                vec![ast::Expr::make(TypeExpr::map(ty("string"), ty("int")), vec![])],
            ),
            ast::Stmt::assign(ast::Expr::index(ident("m"), ast::Expr::string("a")), int(1)),
            ast::Stmt::op_assign(
                ast::Expr::index(ident("m"), ast::Expr::string("a")),
                BinaryOp::Add,
                int(2),
            ),
            ast::Stmt::define(
                &["v", "ok"],
                vec![ast::Expr::index(ident("m"), ast::Expr::string("a"))],
            ),
            ast::Stmt::ret(vec![ident("v"), ident("ok")]),
        ],
    )]);
    let values = interp.call("lookup", Vec::new()).unwrap();
    assert_eq!(as_int(&values[0]), 3);
    assert!(matches!(values[1], Value::Bool(true)));
}

#[test]
fn multi_value_calls_spread_into_definitions() {
    let interp = load(vec![
        func(
            "pair",
            vec![],
            vec![result(ty("int")), result(ty("int"))],
            vec![ast::Stmt::ret(vec![int(4), int(5)])],
        ),
        func(
            "product",
            vec![],
            vec![result(ty("int"))],
            vec![
                ast::Stmt::define(&["a", "b"], vec![call("pair", Vec::new())]),
                ast::Stmt::ret(vec![binary(BinaryOp::Mul, ident("a"), ident("b"))]),
            ],
        ),
    ]);
    let values = interp.call("product", Vec::new()).unwrap();
    assert_eq!(as_int(&values[0]), 20);
}

#[test]
fn definitions_need_a_new_variable() {
    let errors = compile_errors(vec![func(
        "f",
        vec![],
        vec![],
        vec![
            ast::Stmt::define(&["x"], vec![int(1)]),
            ast::Stmt::define(&["x"], vec![int(2)]),
            ast::Stmt::define(&["y", "z"], vec![int(3)]),
        ],
    )]);
    assert_eq!(
        errors,
        vec![
            "no new variables on left side of :=".to_string(),
            "assignment mismatch: 2 variables but 1 value".to_string(),
        ]
    );
}

#[test]
fn runtime_faults_surface_as_errors() {
    let interp = load(vec![
        func(
            "divide",
            vec![param("a", ty("int")), param("b", ty("int"))],
            vec![result(ty("int"))],
            vec![ast::Stmt::ret(vec![binary(BinaryOp::Div, ident("a"), ident("b"))])],
        ),
        func(
            "outOfRange",
            vec![],
            vec![result(ty("int"))],
            vec![
                ast::Stmt::define(&["s"], vec![ast::Expr::make(TypeExpr::slice(ty("int")), vec![int(2)])]),
                ast::Stmt::ret(vec![ast::Expr::index(ident("s"), int(5))]),
            ],
        ),
        func(
            "sendOnClosed",
            vec![],
            vec![],
            vec![
                ast::Stmt::define(&["ch"], vec![make_chan("int", 1)]),
                ast::Stmt::expr(call("close", vec![ident("ch")])),
                ast::Stmt::send(ident("ch"), int(1)),
            ],
        ),
        func(
            "closeTwice",
            vec![],
            vec![],
            vec![
                ast::Stmt::define(&["ch"], vec![make_chan("string", 0)]),
                ast::Stmt::expr(call("close", vec![ident("ch")])),
                ast::Stmt::expr(call("close", vec![ident("ch")])),
            ],
        ),
    ]);
    assert_eq!(
        interp.call("divide", vec![Value::Int(1), Value::Int(0)]).unwrap_err(),
        RuntimeError::DivideByZero
    );
    assert_eq!(
        interp.call("outOfRange", Vec::new()).unwrap_err(),
        RuntimeError::IndexOutOfRange { index: 5, len: 2 }
    );
    assert_eq!(
        interp.call("sendOnClosed", Vec::new()).unwrap_err(),
        RuntimeError::SendOnClosed
    );
    assert_eq!(
        interp.call("closeTwice", Vec::new()).unwrap_err(),
        RuntimeError::CloseOfClosed
    );
}

#[test]
fn constant_send_must_fit_the_element_type() {
    let errors = compile_errors(vec![func(
        "f",
        vec![],
        vec![],
        vec![
            ast::Stmt::define(&["ch"], vec![make_chan("uint8", 1)]),
            ast::Stmt::send(ident("ch"), int(300)),
            ast::Stmt::send(ident("ch"), ast::Expr::string("x")),
        ],
    )]);
    assert_eq!(errors.len(), 2, "{errors:?}");
    assert_eq!(errors[0], "constant 300 overflows uint8");
    assert!(errors[1].ends_with("as type uint8 in send"), "{errors:?}");
}

#[test]
fn every_failing_statement_is_reported() {
    let errors = compile_errors(vec![func(
        "f",
        vec![],
        vec![],
        vec![
            ast::Stmt::define(&["a"], vec![ident("missing")]),
            ast::Stmt::define(&["b"], vec![int(1)]),
            ast::Stmt::expr(ast::Expr::recv(ident("b"))),
            ast::Stmt::expr(ident("b")),
        ],
    )]);
    assert_eq!(
        errors,
        vec![
            "undefined: missing".to_string(),
            "invalid operation: <-b (expecting channel, found int)".to_string(),
            "b (value) is not used".to_string(),
        ]
    );
}

#[test]
fn step_limit_stops_runaway_loops() {
    let config = EngineConfig {
        max_steps: Some(50),
        ..EngineConfig::default()
    };
    let interp = load_with(config, vec![func("spin", vec![], vec![], vec![for_loop(None, None, None, vec![])])]);
    assert_eq!(
        interp.call("spin", Vec::new()).unwrap_err(),
        RuntimeError::StepLimit { limit: 50 }
    );
}

#[test]
fn unbuffered_channel_connects_two_threads() {
    let interp = load(vec![
        func(
            "newChan",
            vec![],
            vec![result(chan_of(ChanDir::Both, ty("int")))],
            vec![ast::Stmt::ret(vec![ast::Expr::make(
                chan_of(ChanDir::Both, ty("int")),
                vec![],
            )])],
        ),
        func(
            "produce",
            vec![param("ch", chan_of(ChanDir::Send, ty("int"))), param("n", ty("int"))],
            vec![],
            vec![
                for_loop(
                    Some(ast::Stmt::define(&["i"], vec![int(0)])),
                    Some(binary(BinaryOp::Lt, ident("i"), ident("n"))),
                    Some(ast::Stmt::inc(ident("i"))),
                    vec![ast::Stmt::send(ident("ch"), ident("i"))],
                ),
                ast::Stmt::expr(call("close", vec![ident("ch")])),
            ],
        ),
        func(
            "consume",
            vec![param("ch", chan_of(ChanDir::Recv, ty("int")))],
            vec![result(ty("int"))],
            vec![
                ast::Stmt::define(&["s"], vec![int(0)]),
                range(
                    Some("v"),
                    None,
                    ident("ch"),
                    vec![ast::Stmt::op_assign(ident("s"), BinaryOp::Add, ident("v"))],
                ),
                ast::Stmt::ret(vec![ident("s")]),
            ],
        ),
    ]);
    let chan = interp.call("newChan", Vec::new()).unwrap().remove(0);
    let interp = &interp;
    let total = thread::scope(|scope| {
        let sender = {
            let chan = chan.clone();
            scope.spawn(move || interp.call("produce", vec![chan, Value::Int(5)]))
        };
        let total = interp.call("consume", vec![chan]).unwrap();
        sender.join().unwrap().unwrap();
        total
    });
    assert_eq!(as_int(&total[0]), 10);
}

#[test]
fn package_variables_initialize_before_init_functions() {
    let mut interp = Interpreter::default();
    interp
        .load(&file(vec![
            ast::Decl::Var(ast::VarDecl {
                names: vec![ast::Identifier::new("count")],
                ty: Some(ty("int")),
                values: vec![int(40)],
                span: Span::default(),
            }),
            func(
                "init",
                vec![],
                vec![],
                vec![ast::Stmt::op_assign(ident("count"), BinaryOp::Add, int(2))],
            ),
        ]))
        .unwrap();
    assert_eq!(interp.global("count").map(|value| as_int(&value)), Some(42));
    assert!(matches!(
        interp.call("missing", Vec::new()),
        Err(RuntimeError::UnknownFunction { .. })
    ));
}

#[test]
fn traced_execution_gives_same_result() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("gofast=trace"))
        .with_test_writer()
        .try_init();
    let config = EngineConfig {
        trace: true,
        ..EngineConfig::default()
    };
    let interp = load_with(config, round_trip_program("int"));
    let values = interp.call("roundTrip", Vec::new()).expect("call succeeds");
    assert_eq!(values.len(), 1);
    assert_eq!(as_int(&values[0]), 7);
}

fn slice_lit(elem: &str, items: Vec<ast::Expr>) -> ast::Expr {
    ast::Expr::Composite {
        ty: TypeExpr::slice(ty(elem)),
        elements: items
            .into_iter()
            .map(|value| ast::Element { key: None, value })
            .collect(),
        span: Span::default(),
    }
}

fn slice_expr(base: ast::Expr, low: i128, high: i128) -> ast::Expr {
    ast::Expr::Slice {
        base: Box::new(base),
        low: Some(Box::new(int(low))),
        high: Some(Box::new(int(high))),
        span: Span::default(),
    }
}

#[test]
fn single_value_receive_on_drained_channel_yields_zero() {
    let disabled = EngineConfig {
        native_fast_path: false,
        ..EngineConfig::default()
    };
    for elem in ["int", "MyInt"] {
        for config in [EngineConfig::default(), disabled.clone()] {
            let interp = load_with(
                config,
                vec![
                    named_type("MyInt", ty("int")),
                    func(
                        "drained",
                        vec![],
                        vec![result(ty(elem)), result(ty(elem))],
                        vec![
                            ast::Stmt::define(&["ch"], vec![make_chan(elem, 1)]),
                            ast::Stmt::send(ident("ch"), int(9)),
                            ast::Stmt::expr(call("close", vec![ident("ch")])),
                            ast::Stmt::define(&["first"], vec![ast::Expr::recv(ident("ch"))]),
                            ast::Stmt::define(&["x"], vec![ast::Expr::recv(ident("ch"))]),
                            ast::Stmt::ret(vec![ident("first"), ident("x")]),
                        ],
                    ),
                ],
            );
            let values = interp.call("drained", Vec::new()).unwrap();
            assert_eq!(values.len(), 2, "{elem}");
            assert_eq!(as_int(&values[0]), 9, "{elem}");
            assert_eq!(as_int(&values[1]), 0, "{elem}");
        }
    }
}

#[test]
fn loop_body_count_follows_trip_count() {
    let interp = load(vec![func(
        "sum",
        vec![param("n", ty("int"))],
        vec![result(ty("int"))],
        vec![
            ast::Stmt::define(&["s"], vec![int(0)]),
            for_loop(
                Some(ast::Stmt::define(&["i"], vec![int(0)])),
                Some(binary(BinaryOp::Lt, ident("i"), ident("n"))),
                Some(ast::Stmt::inc(ident("i"))),
                vec![ast::Stmt::op_assign(ident("s"), BinaryOp::Add, int(1))],
            ),
            ast::Stmt::ret(vec![ident("s")]),
        ],
    )]);
    for n in [1u64, 10, 1000] {
        let (values, profile) = interp.call_profiled("sum", vec![Value::Int(n as i64)]).unwrap();
        assert_eq!(as_int(&values[0]), n as i64);
        assert_eq!(profile.counts_for(Op::Assign), vec![n], "body at n={n}");
        assert_eq!(profile.counts_for(Op::Post), vec![n], "post at n={n}");
        assert_eq!(profile.counts_for(Op::Return), vec![1, 0], "return at n={n}");
    }
}

#[test]
fn range_over_slice_and_map_variables() {
    let interp = load(vec![func(
        "sums",
        vec![],
        vec![result(ty("int")), result(ty("int"))],
        vec![
            ast::Stmt::define(&["s"], vec![slice_lit("int", vec![int(1), int(2), int(3)])]),
            ast::Stmt::define(&["t"], vec![int(0)]),
            range(
                Some("_"),
                Some("v"),
                ident("s"),
                vec![ast::Stmt::op_assign(ident("t"), BinaryOp::Add, ident("v"))],
            ),
            ast::Stmt::define(
                &["m"],
                vec![ast::Expr::make(TypeExpr::map(ty("string"), ty("int")), vec![])],
            ),
            ast::Stmt::assign(ast::Expr::index(ident("m"), ast::Expr::string("a")), int(4)),
            ast::Stmt::assign(ast::Expr::index(ident("m"), ast::Expr::string("bc")), int(5)),
            ast::Stmt::define(&["u"], vec![int(0)]),
            range(
                Some("k"),
                Some("v"),
                ident("m"),
                vec![ast::Stmt::op_assign(
                    ident("u"),
                    BinaryOp::Add,
                    binary(BinaryOp::Add, ident("v"), call("len", vec![ident("k")])),
                )],
            ),
            ast::Stmt::ret(vec![ident("t"), ident("u")]),
        ],
    )]);
    let values = interp.call("sums", Vec::new()).unwrap();
    assert_eq!(as_int(&values[0]), 6);
    assert_eq!(as_int(&values[1]), 4 + 1 + 5 + 2);
}

#[test]
fn range_count_beyond_signed_range_iterates() {
    let interp = load(vec![func(
        "upTo3",
        vec![param("n", ty("uint64"))],
        vec![result(ty("int"))],
        vec![
            ast::Stmt::define(&["c"], vec![int(0)]),
            range(
                None,
                None,
                ident("n"),
                vec![
                    ast::Stmt::inc(ident("c")),
                    if_then(
                        binary(BinaryOp::Eq, ident("c"), int(3)),
                        vec![ast::Stmt::Break(Span::default())],
                    ),
                ],
            ),
            ast::Stmt::ret(vec![ident("c")]),
        ],
    )]);
    let values = interp.call("upTo3", vec![Value::Uint64(u64::MAX)]).unwrap();
    assert_eq!(as_int(&values[0]), 3);
    let values = interp.call("upTo3", vec![Value::Uint64(0)]).unwrap();
    assert_eq!(as_int(&values[0]), 0);
}

#[test]
fn oversized_make_panics_inside_the_program() {
    let interp = load(vec![
        func(
            "chanOf",
            vec![param("n", ty("int"))],
            vec![],
            vec![
                ast::Stmt::define(&["ch"], vec![ast::Expr::make(chan_of(ChanDir::Both, ty("int")), vec![ident("n")])]),
                ast::Stmt::expr(call("close", vec![ident("ch")])),
            ],
        ),
        func(
            "sliceOf",
            vec![param("n", ty("int"))],
            vec![result(ty("int"))],
            vec![
                ast::Stmt::define(&["s"], vec![ast::Expr::make(TypeExpr::slice(ty("int")), vec![ident("n")])]),
                ast::Stmt::ret(vec![call("len", vec![ident("s")])]),
            ],
        ),
    ]);
    let huge = Value::Int(1 << 61);
    assert!(matches!(
        interp.call("chanOf", vec![huge.clone()]),
        Err(RuntimeError::Panic { message }) if message.contains("makechan: size out of range")
    ));
    assert!(matches!(
        interp.call("sliceOf", vec![huge]),
        Err(RuntimeError::Panic { message }) if message.contains("makeslice: len out of range")
    ));
    assert!(interp.call("chanOf", vec![Value::Int(8)]).is_ok());
    let values = interp.call("sliceOf", vec![Value::Int(4)]).unwrap();
    assert_eq!(as_int(&values[0]), 4);
}

#[test]
fn string_slices_must_stay_on_rune_boundaries() {
    let interp = load(vec![
        func(
            "head",
            vec![param("s", ty("string"))],
            vec![result(ty("int"))],
            vec![ast::Stmt::ret(vec![call("len", vec![slice_expr(ident("s"), 0, 1)])])],
        ),
        func(
            "decode",
            vec![param("b", TypeExpr::slice(ty("byte")))],
            vec![result(ty("string"))],
            vec![ast::Stmt::ret(vec![call("string", vec![ident("b")])])],
        ),
    ]);
    let values = interp.call("head", vec![Value::string("ab")]).unwrap();
    assert_eq!(as_int(&values[0]), 1);
    assert_eq!(
        interp.call("head", vec![Value::string("é")]).unwrap_err(),
        RuntimeError::InvalidUtf8 { op: "string slice" }
    );

    let bytes = |items: &[u8]| Value::Slice(SliceValue::from_vec(items.iter().map(|b| Value::Uint8(*b)).collect()));
    let values = interp.call("decode", vec![bytes(b"hi")]).unwrap();
    assert_eq!(values[0].to_string(), "hi");
    assert_eq!(
        interp.call("decode", vec![bytes(&[0xff])]).unwrap_err(),
        RuntimeError::InvalidUtf8 { op: "string conversion" }
    );
}

#[test]
fn assignment_evaluates_index_operands_before_storing() {
    // i, a[i] = 1, 2
    let interp = load(vec![func(
        "swap",
        vec![],
        vec![result(ty("int")), result(ty("int")), result(ty("int"))],
        vec![
            ast::Stmt::define(&["a"], vec![ast::Expr::make(TypeExpr::slice(ty("int")), vec![int(3)])]),
            ast::Stmt::define(&["i"], vec![int(0)]),
            ast::Stmt::Assign {
                targets: vec![ident("i"), ast::Expr::index(ident("a"), ident("i"))],
                op: ast::AssignOp::Assign,
                values: vec![int(1), int(2)],
                span: Span::default(),
            },
            ast::Stmt::ret(vec![
                ident("i"),
                ast::Expr::index(ident("a"), int(0)),
                ast::Expr::index(ident("a"), int(1)),
            ]),
        ],
    )]);
    let values = interp.call("swap", Vec::new()).unwrap();
    let values: Vec<i64> = values.iter().map(as_int).collect();
    assert_eq!(values, vec![1, 2, 0]);
}

#[test]
fn concurrent_calls_have_separate_step_budgets() {
    // each call alone stays under the limit, together they exceed it
    let config = EngineConfig {
        max_steps: Some(1500),
        ..EngineConfig::default()
    };
    let interp = load_with(
        config,
        vec![
            func(
                "newChan",
                vec![],
                vec![result(chan_of(ChanDir::Both, ty("int")))],
                vec![ast::Stmt::ret(vec![ast::Expr::make(
                    chan_of(ChanDir::Both, ty("int")),
                    vec![],
                )])],
            ),
            func(
                "produce",
                vec![param("ch", chan_of(ChanDir::Send, ty("int")))],
                vec![],
                vec![
                    for_loop(
                        Some(ast::Stmt::define(&["i"], vec![int(0)])),
                        Some(binary(BinaryOp::Lt, ident("i"), int(200))),
                        Some(ast::Stmt::inc(ident("i"))),
                        vec![ast::Stmt::send(ident("ch"), int(1))],
                    ),
                    ast::Stmt::expr(call("close", vec![ident("ch")])),
                ],
            ),
            func(
                "consume",
                vec![param("ch", chan_of(ChanDir::Recv, ty("int")))],
                vec![result(ty("int"))],
                vec![
                    ast::Stmt::define(&["s"], vec![int(0)]),
                    range(
                        Some("v"),
                        None,
                        ident("ch"),
                        vec![ast::Stmt::op_assign(ident("s"), BinaryOp::Add, ident("v"))],
                    ),
                    ast::Stmt::ret(vec![ident("s")]),
                ],
            ),
        ],
    );
    let chan = interp.call("newChan", Vec::new()).unwrap().remove(0);
    let interp = &interp;
    let (produced, consumed) = thread::scope(|scope| {
        let sender = {
            let chan = chan.clone();
            scope.spawn(move || interp.call("produce", vec![chan]))
        };
        let consumed = interp.call("consume", vec![chan]);
        (sender.join().unwrap(), consumed)
    });
    assert!(produced.is_ok(), "{produced:?}");
    assert_eq!(as_int(&consumed.unwrap()[0]), 200);
}
