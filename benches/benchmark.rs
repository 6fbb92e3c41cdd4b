use criterion::{Criterion, black_box, criterion_group, criterion_main};
use promptbus::{
    binding::{Source, bind},
    prompt::{PromptAssembler, PromptDefinition, TemplateEngine, TemplateRenderer},
};
use serde_json::{Map, Value, json};

fn schema() -> Value {
    json!({
        "type": "object",
        "required": ["tag"],
        "properties": {
            "tag": {"type": "string", "x-aliases": ["topic.name", "category"]},
            "count": {"type": "integer", "default": 3},
            "level": {"type": "string", "x-deepSearch": true},
            "author": {
                "type": "object",
                "properties": {"name": {"type": "string"}, "email": {"type": "string"}}
            }
        }
    })
}

fn sources() -> Vec<Source> {
    vec![
        Source::text(r#"{"topic": {"name": "Spring"}, "count": "5"}"#),
        Source::tree(json!({"course": {"meta": {"level": "EASY"}}, "author": {"name": "Ada"}})),
        Source::tree(json!({"email": "ada@example.com"})),
    ]
}

fn bench_bind(c: &mut Criterion) {
    let schema = schema();
    let sources = sources();
    let defaults = Map::new();
    c.bench_function("bind three sources", |b| {
        b.iter(|| bind(black_box(&schema), &defaults, false, black_box(&sources)))
    });
}

fn bench_render(c: &mut Criterion) {
    let engine = TemplateEngine::new();
    let template = "Generate {{count}} {{difficulty}} questions about {{tag}}.";
    let args = json!({"count": 5, "difficulty": "EASY", "tag": "Spring"})
        .as_object()
        .cloned()
        .unwrap_or_default();
    c.bench_function("render cached template", |b| {
        b.iter(|| engine.render(black_box(template), black_box(&args)))
    });
}

fn bench_assemble(c: &mut Criterion) {
    let assembler = PromptAssembler::new();
    let definition = PromptDefinition::new(
        "quiz-generation",
        1,
        "gpt-4o-mini",
        "Generate {{count}} {{level}} questions about {{tag}}.",
    )
    .with_args_schema(schema());
    let sources = sources();
    c.bench_function("assemble from sources", |b| {
        b.iter(|| assembler.render_from_sources(black_box(&definition), black_box(&sources)))
    });
}

// ベンチマークグループの定義
criterion_group!(benches, bench_bind, bench_render, bench_assemble);
criterion_main!(benches);
