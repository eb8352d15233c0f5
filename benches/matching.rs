use divan::AllocProfiler;
use divan::{Bencher, black_box};
use layersearch::{GrammarQueryCompiler, LayerDict, Matcher, parse_grammar};

#[global_allocator]
static ALLOC: AllocProfiler = AllocProfiler::system();

fn main() {
    divan::main();
}

const SENTENCE: &str = "tere ohsa tere pere kala ohsa tere pere ";

const GRAMMAR: &str = r#"{"op": "intersect", "children": [
    {"op": "gap", "slop": 3, "children": [
        {"layer": "text", "terms": ["tere"]},
        {"layer": "text", "pattern": "p.re"}
    ]},
    {"op": "union", "children": [
        {"layer": "text_mlp.pos_tags", "terms": ["S"], "case_sensitive": true},
        {"op": "not", "children": [{"layer": "text", "terms": ["kala"]}]}
    ]}
]}"#;

fn document(repeats: usize) -> LayerDict {
    LayerDict::new()
        .with_layer("text", SENTENCE.repeat(repeats))
        .with_layer("text_mlp.pos_tags", "I S I S S S I S ".repeat(repeats))
}

/// Index construction for a layer of growing length
#[divan::bench(args = [10, 100, 1000])]
fn build_token_index(bencher: Bencher, repeats: usize) {
    let key = layersearch::LayerKey::parse("text");
    bencher
        .with_inputs(|| document(repeats))
        .bench_local_values(|layers| black_box(layers.token_count(&key).unwrap()));
}

/// Exact matching of a nested grammar; the gap enumerates a growing product
#[divan::bench(args = [1, 4, 16])]
fn match_grammar(bencher: Bencher, repeats: usize) {
    let matcher = Matcher::from_grammar(&parse_grammar(GRAMMAR).unwrap()).unwrap();
    bencher
        .with_inputs(|| document(repeats))
        .bench_local_values(|layers| black_box(matcher.find_matches(&layers).unwrap().len()));
}

#[divan::bench]
fn compile_query(bencher: Bencher) {
    let grammar = parse_grammar(GRAMMAR).unwrap();
    let compiler = GrammarQueryCompiler::new();
    bencher.bench_local(|| black_box(compiler.compile(Some(&grammar), None).unwrap()));
}
