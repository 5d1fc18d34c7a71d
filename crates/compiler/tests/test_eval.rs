//! End-to-end: source text through reader, compiler, scheduler, engine

use arcueid_compiler::eval_source;
use arcueid_core::pprint::write_value;
use arcueid_core::string::to_rust_string;
use arcueid_core::value::{has_tag, Tag, Value};
use arcueid_core::Interp;

fn boot() -> Interp {
    arcueid_runtime::boot()
}

fn eval(c: &mut Interp, src: &str) -> Value {
    match eval_source(c, src) {
        Ok(v) => v,
        Err(e) => panic!("eval of {:?} failed: {}", src, e),
    }
}

#[test]
fn arithmetic_application() {
    let mut c = boot();
    assert_eq!(eval(&mut c, "(+ 2 3)"), Value::Fixnum(5));
    assert_eq!(eval(&mut c, "(- 10 4)"), Value::Fixnum(6));
    assert_eq!(eval(&mut c, "(* 6 7)"), Value::Fixnum(42));
}

#[test]
fn ten_operand_fold() {
    let mut c = boot();
    assert_eq!(
        eval(&mut c, "(+ 1 2 3 4 5 6 7 8 9 10)"),
        Value::Fixnum(55)
    );
}

#[test]
fn immediate_lambda_application() {
    let mut c = boot();
    assert_eq!(eval(&mut c, "((fn (x y) (+ x y)) 2 3)"), Value::Fixnum(5));
}

#[test]
fn conditionals() {
    let mut c = boot();
    assert_eq!(eval(&mut c, "(if t 1 2)"), Value::Fixnum(1));
    assert_eq!(eval(&mut c, "(if nil 1 2)"), Value::Fixnum(2));
    assert_eq!(eval(&mut c, "(if nil 1)"), Value::Nil);
    assert_eq!(eval(&mut c, "(if)"), Value::Nil);
    // elif chains
    assert_eq!(eval(&mut c, "(if nil 1 nil 2 3)"), Value::Fixnum(3));
}

#[test]
fn closures_capture_their_environment() {
    let mut c = boot();
    let r = eval(
        &mut c,
        "(let ((x 10)) (let ((f (fn (y) (+ x y)))) (f 5)))",
    );
    assert_eq!(r, Value::Fixnum(15));
}

#[test]
fn rest_arguments_build_a_list() {
    let mut c = boot();
    let r = eval(&mut c, "((fn args args) 1 2 3)");
    assert_eq!(write_value(&mut c, r, true), "(1 2 3)");
}

#[test]
fn optional_arguments_take_defaults() {
    let mut c = boot();
    assert_eq!(eval(&mut c, "((fn (a (o b 10)) (+ a b)) 5)"), Value::Fixnum(15));
    assert_eq!(eval(&mut c, "((fn (a (o b 10)) (+ a b)) 5 1)"), Value::Fixnum(6));
    // the default can reference an earlier parameter
    assert_eq!(eval(&mut c, "((fn (a (o b a)) (+ a b)) 7)"), Value::Fixnum(14));
}

#[test]
fn coerce_binary_string() {
    let mut c = boot();
    assert_eq!(eval(&mut c, "(coerce \"100\" 'int 2)"), Value::Fixnum(4));
}

#[test]
fn string_port_utf8_round_trip() {
    let mut c = boot();
    let r = eval(
        &mut c,
        "(let ((out (outstring))) (disp \"遠野\" out) (inside out))",
    );
    assert!(has_tag(r, Tag::Str));
    assert_eq!(to_rust_string(r), "遠野");
    // write is the readable rendition: quotes survive
    let r = eval(
        &mut c,
        "(let ((out (outstring))) (write \"遠野\" out) (inside out))",
    );
    assert_eq!(to_rust_string(r), "\"遠野\"");
}

#[test]
fn assignment_binds_globally() {
    let mut c = boot();
    assert_eq!(eval(&mut c, "(assign x 42) x"), Value::Fixnum(42));
    assert_eq!(eval(&mut c, "(assign x 1 y 2) (+ x y)"), Value::Fixnum(3));
}

#[test]
fn assignment_targets_lexical_bindings_first() {
    let mut c = boot();
    let r = eval(&mut c, "((fn (x) (assign x 9) x) 1)");
    assert_eq!(r, Value::Fixnum(9));
}

#[test]
fn quotation() {
    let mut c = boot();
    let r = eval(&mut c, "'(1 2 3)");
    assert_eq!(write_value(&mut c, r, true), "(1 2 3)");
    let s = eval(&mut c, "'foo");
    assert!(matches!(s, Value::Sym(_)));
}

#[test]
fn quasiquotation_with_splicing() {
    let mut c = boot();
    let r = eval(&mut c, "`(1 ,(+ 1 1) ,@(list 3 4))");
    assert_eq!(write_value(&mut c, r, true), "(1 2 3 4)");
    // nested quasiquote keeps inner unquotes intact
    let n = eval(&mut c, "`(a `(b ,(c)))");
    assert_eq!(write_value(&mut c, n, true), "(a (quasiquote (b (unquote (c)))))");
}

#[test]
fn rational_division_and_demotion() {
    let mut c = boot();
    let half = eval(&mut c, "(/ 1 2)");
    assert!(has_tag(half, Tag::Rational));
    assert_eq!(eval(&mut c, "(* (/ 1 2) 2)"), Value::Fixnum(1));
    assert_eq!(eval(&mut c, "(/ 7 7)"), Value::Fixnum(1));
}

#[test]
fn table_and_string_applicators() {
    let mut c = boot();
    let r = eval(&mut c, "(let ((g (table))) (sref g 5 'k) (g 'k))");
    assert_eq!(r, Value::Fixnum(5));
    let missing = eval(&mut c, "(let ((g (table))) (g 'absent 'dflt))");
    assert!(matches!(missing, Value::Sym(_)));
    let ch = eval(&mut c, "(\"abc\" 1)");
    assert!(has_tag(ch, Tag::Char));
    assert_eq!(arcueid_core::string::char_of(ch), 'b');
}

#[test]
fn builtin_macros_def_and_when() {
    let mut c = boot();
    assert_eq!(
        eval(&mut c, "(def double (x) (* x 2)) (double 21)"),
        Value::Fixnum(42)
    );
    assert_eq!(eval(&mut c, "(when t 1 2 3)"), Value::Fixnum(3));
    assert_eq!(eval(&mut c, "(when nil 1 2 3)"), Value::Nil);
}

#[test]
fn user_macros_expand_at_compile_time() {
    let mut c = boot();
    let r = eval(
        &mut c,
        "(assign inc (annotate 'mac (fn (x) (list '+ x 1)))) (inc 4)",
    );
    assert_eq!(r, Value::Fixnum(5));
}

#[test]
fn on_err_recovers() {
    let mut c = boot();
    let r = eval(
        &mut c,
        "(on-err (fn (e) 42) (fn () (err \"boom\")))",
    );
    assert_eq!(r, Value::Fixnum(42));
    // no error: the thunk's value flows through
    let r = eval(&mut c, "(on-err (fn (e) 42) (fn () 7))");
    assert_eq!(r, Value::Fixnum(7));
}

#[test]
fn unhandled_errors_surface() {
    let mut c = boot();
    assert!(eval_source(&mut c, "(err \"boom\")").is_err());
    assert!(eval_source(&mut c, "(car 5)").is_err());
    assert!(eval_source(&mut c, "(/ 1 0)").is_err());
    assert!(eval_source(&mut c, "unbound-name-here").is_err());
}

#[test]
fn deep_recursion_runs_on_the_thread_stack_not_the_native_one() {
    let mut c = boot();
    // non-tail recursion costs one thread-stack slot per level, never a
    // native frame
    let r = eval(
        &mut c,
        "(def count-down (n) (if (is n 0) 0 (+ 1 (count-down (- n 1)))))
         (count-down 1500)",
    );
    assert_eq!(r, Value::Fixnum(1500));
}

#[test]
fn thread_stack_overflow_is_recoverable() {
    let mut c = boot();
    let r = eval(
        &mut c,
        "(def count-down (n) (if (is n 0) 0 (+ 1 (count-down (- n 1)))))
         (on-err (fn (e) 'blown) (fn () (count-down 100000)))",
    );
    assert_eq!(r, arcueid_core::symbol::intern(&mut c, "blown"));
}

#[test]
fn spawned_threads_complete_before_the_expression_returns() {
    let mut c = boot();
    let r = eval(
        &mut c,
        "(assign side nil)
         (spawn (fn () (assign side 'ran)))
         side",
    );
    assert_eq!(r, arcueid_core::symbol::intern(&mut c, "ran"));
}

#[test]
fn fixnum_overflow_promotes_in_source() {
    let mut c = boot();
    let r = eval(&mut c, "(* 4611686018427387903 4)");
    assert!(has_tag(r, Tag::Bignum));
}
