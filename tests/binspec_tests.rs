/// Bin-spec compiler tests
///
/// Grammar and value-range properties of the mutation mini-language.
/// Run with: cargo test --test binspec_tests

use kvtraffic::binspec::{ALPHABET, BinKind, BinSpecs};
use kvtraffic::{Value, compile, compile_with};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn names(spec: &str) -> Vec<String> {
    compile(spec).into_iter().map(|op| op.name).collect()
}

#[test]
fn test_string_clause_length_and_alphabet() {
    for len in [0usize, 1, 8, 64] {
        let ops = compile(&format!("junk:str:{}", len));
        assert_eq!(ops.len(), 1);
        let Value::Str(s) = &ops[0].value else {
            panic!("expected a string, got {:?}", ops[0].value);
        };
        assert_eq!(s.len(), len);
        assert!(s.bytes().all(|b| ALPHABET.contains(&b)), "unexpected char in {}", s);
    }
}

#[test]
fn test_string_kind_aliases() {
    for kind in ["string", "str", "s"] {
        let ops = compile(&format!("name:{}:5", kind));
        assert_eq!(ops.len(), 1, "kind {} was dropped", kind);
    }
}

#[test]
fn test_int_clause_ranges() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..500 {
        let ops = compile_with("a:int:200,b:i:10-20", &mut rng);
        let a = ops[0].value.as_i64().unwrap();
        let b = ops[1].value.as_i64().unwrap();
        assert!((0..200).contains(&a), "a = {}", a);
        assert!((10..20).contains(&b), "b = {}", b);
    }
}

#[test]
fn test_malformed_clauses_keep_siblings() {
    assert_eq!(names("junk:str:8,bad:int:x-y,color:blue"), vec!["junk", "color"]);
    assert_eq!(names("a:int:20-10,b:int:5-5,c:1"), vec!["c"]);
    assert_eq!(names("a:str:-3,b:str:abc,c:x:y:z,d:2"), vec!["d"]);
    assert_eq!(names("a:int:1-2-3,b:int:"), Vec::<String>::new());
}

#[test]
fn test_literals() {
    let ops = compile("age:24,name:bob,neg:-5");
    assert_eq!(ops[0].name, "age");
    assert_eq!(ops[0].value, Value::Int(24));
    assert_eq!(ops[1].name, "name");
    assert_eq!(ops[1].value, Value::from("bob"));
    assert_eq!(ops[2].value, Value::Int(-5));
}

#[test]
fn test_parsed_specs_reused_across_writes() {
    let specs = BinSpecs::parse("junk:str:8,randInt:int:200,color:blue");
    assert_eq!(specs.clauses().len(), 3);
    assert_eq!(specs.clauses()[1].kind, BinKind::RandomInt { min: 0, max: 200 });

    let mut rng = StdRng::seed_from_u64(1);
    let first = specs.generate(&mut rng);
    let second = specs.generate(&mut rng);
    assert_eq!(first.len(), 3);
    assert_eq!(first[2], second[2]);
}
