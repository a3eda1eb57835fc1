use crate::*;

fn run_driver(source: &str, opts: Opt) -> Option<String> {
    let mut diag = DiagnosticEmitter::log_to_buffer();
    process_source(source, &mut diag, &opts)?;
    Some(diag.out_buffer().unwrap() + &diag.err_buffer().unwrap())
}

fn run_failing(source: &str, opts: Opt) -> String {
    let mut diag = DiagnosticEmitter::log_to_buffer();
    assert!(process_source(source, &mut diag, &opts).is_none());
    diag.out_buffer().unwrap() + &diag.err_buffer().unwrap()
}

const NULL_CHECK: &str = r"param p: ref
0: push p
1: push null
2: ne
3: if_false 7
4: push p
5: probe 1
6: pop
7: push p
8: probe 2
9: return value
";

const REQUIRE_NON_NULL: &str = r"param p: ref
0: push p
1: push null
2: eq
3: if_false 5
4: throw
5: push p
6: return value
";

const COUNTING_LOOP: &str = r"var i: int
var n: int
0: push 0
1: assign i
2: push i
3: push n
4: lt
5: if_false 11
6: push i
7: push 1
8: add
9: assign i
10: goto 2
11: push i
12: probe 1
13: return value
";

#[test]
fn null_check() {
    let expected = r"outcome: ok
@1: {NotNull}
@2: {Nullable}
returns: {Nullable}
";
    let output = run_driver(NULL_CHECK, Opt::default()).unwrap();
    assert_eq!(output, expected);
}

#[test]
fn constants_and_unreachable_code() {
    let source = r"var x: int
0: push 5
1: assign x
2: push x
3: push 5
4: lt
5: if_false 9
6: push x
7: probe 1
8: pop
9: push x
10: probe 2
11: return value
";
    let expected = r"outcome: ok
@2: {[5, 5]} = 5
returns: {[5, 5]} = 5
unreachable: @1
";
    let output = run_driver(source, Opt::default()).unwrap();
    assert_eq!(output, expected);
}

#[test]
fn loops() {
    let expected = r"loop 1: 2 3 4 5 6 7 8 9 10
outcome: ok
@1: {[0, inf]}
returns: {[0, inf]}
";
    let opts = Opt {
        loops: true,
        ..Opt::default()
    };
    let output = run_driver(COUNTING_LOOP, opts).unwrap();
    assert_eq!(output, expected);

    let opts = Opt {
        step_limit: Some(1),
        ..Opt::default()
    };
    let output = run_driver(COUNTING_LOOP, opts).unwrap();
    assert_eq!(output, "outcome: too complex\n");
}

#[test]
fn call_failures() {
    let source = r#"param p: ref
0: push p
1: call require 1 pure : ref contract "null -> fail; !null -> !null" @3
2: return value
"#;
    let expected = r"outcome: ok
@3: call fails on 0 path(s), 1 ephemeral
returns: {NotNull}
";
    let output = run_driver(source, Opt::default()).unwrap();
    assert_eq!(output, expected);
}

#[test]
fn dump_listing() {
    let expected = r"0: push p
1: push null
2: eq
3: if_false 5
4: throw
5: push p
6: return value
";
    let opts = Opt {
        dump_listing: true,
        ..Opt::default()
    };
    let output = run_driver(REQUIRE_NON_NULL, opts).unwrap();
    assert_eq!(output, expected);
}

#[test]
fn check_contracts() {
    let check = |contracts: &str| {
        let opts = Opt {
            contracts: Some(contracts.to_owned()),
            ..Opt::default()
        };
        run_driver(REQUIRE_NON_NULL, opts).unwrap()
    };
    assert_eq!(check("null -> fail; !null -> !null"), "contracts hold\n");
    assert_eq!(
        check("_ -> fail"),
        "violation: clause 0 promises failure but the procedure can complete\n"
    );
    assert_eq!(
        check("null -> fail; !null -> null"),
        "violation: clause 1 is contradicted by a returned value {NotNull}\n"
    );
}

#[test]
fn contract_parse_error() {
    let opts = Opt {
        contracts: Some("null -> maybe".to_owned()),
        ..Opt::default()
    };
    let expected = r"Error: unknown return constraint 'maybe'
  null -> maybe
          ^^^^^
";
    assert_eq!(run_failing(REQUIRE_NON_NULL, opts), expected);
}

#[test]
fn listing_error() {
    let output = run_failing("0: push y\n1: return", Opt::default());
    assert_eq!(output, "[line 1] Error: undeclared value 'y'\n");
}

#[test]
fn aborted_run() {
    let expected = r"outcome: aborted
instruction 0: stack underflow at instruction 0: needed 1 value(s), found 0
state: stack: [] facts: {} relations: []
0: pop
1: return

";
    assert_eq!(run_failing("0: pop\n1: return", Opt::default()), expected);
}
