use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use querent::decompose::Decomposer;
use querent::dnf::{to_dnf, Dnf};
use querent::expr::{Expr, SymbolTable};
use querent::translate::SpacesTranslator;

fn wide_disjunction(n: usize) -> (Dnf, SymbolTable) {
    let mut symbols = SymbolTable::new();
    let children: Vec<Expr> = (0..n)
        .map(|i| {
            Expr::And(vec![
                Expr::Literal(symbols.intern(&format!("term{i}"))),
                Expr::Literal(symbols.intern(&format!("qualifier{}", i % 3))),
            ])
        })
        .collect();
    (to_dnf(&Expr::Or(children), false), symbols)
}

fn bench_rewrite(c: &mut Criterion) {
    let mut symbols = SymbolTable::new();
    // ~((a | b) & (c | d) & (e | f)): distribution plus De Morgan.
    let pairs: Vec<Expr> = (0..3)
        .map(|i| {
            Expr::Or(vec![
                Expr::Literal(symbols.intern(&format!("left{i}"))),
                Expr::Literal(symbols.intern(&format!("right{i}"))),
            ])
        })
        .collect();
    let expr = Expr::not(Expr::And(pairs));

    c.bench_function("rewrite_nested", |b| {
        b.iter(|| to_dnf(black_box(&expr), false))
    });
    c.bench_function("rewrite_nested_deep", |b| {
        b.iter(|| to_dnf(black_box(&expr), true))
    });
}

fn bench_decompose_and_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("decompose_and_render");
    for n in [8, 12, 16] {
        let (dnf, symbols) = wide_disjunction(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let mut rendered = 0usize;
                for sub in Decomposer::new(&dnf).subqueries() {
                    rendered += SpacesTranslator
                        .render(black_box(&sub.term), &symbols)
                        .len();
                }
                rendered
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_rewrite, bench_decompose_and_render);
criterion_main!(benches);
