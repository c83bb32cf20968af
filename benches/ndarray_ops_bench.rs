use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_ndarray_lib::{ops, CpuTensor, DataType};

fn create_random(shape: &[usize]) -> CpuTensor {
    ops::random_uniform(shape, 0.0, 1.0, DataType::Float32).unwrap()
}

fn bench_matrix_multiply(c: &mut Criterion) {
    let shapes = [([64, 64], "64"), ([256, 256], "256")];
    let mut group = c.benchmark_group("matrix_multiply");

    for (shape, size) in shapes.iter() {
        let a = create_random(shape);
        let b = create_random(shape);
        group.bench_function(format!("matmul_{}", size), |bencher| {
            bencher.iter(|| {
                black_box(ops::matmul(black_box(&a), black_box(&b))).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_elementwise(c: &mut Criterion) {
    let mut group = c.benchmark_group("elementwise");
    let a = create_random(&[512, 512]);
    let b = create_random(&[512, 512]);
    let row = create_random(&[512]);

    group.bench_function("add", |bencher| {
        bencher.iter(|| black_box(a.add(black_box(&b))).unwrap());
    });
    group.bench_function("add_broadcast", |bencher| {
        bencher.iter(|| black_box(a.add(black_box(&row))).unwrap());
    });
    group.bench_function("addi", |bencher| {
        let target = a.dup().unwrap();
        bencher.iter(|| black_box(target.addi(black_box(&b))).unwrap());
    });
    group.finish();
}

fn bench_reductions(c: &mut Criterion) {
    let mut group = c.benchmark_group("reductions");
    let a = create_random(&[512, 512]);

    group.bench_function("sum_all", |bencher| {
        bencher.iter(|| black_box(a.sum(&[], false)).unwrap());
    });
    group.bench_function("sum_axis_1", |bencher| {
        bencher.iter(|| black_box(a.sum(&[1], false)).unwrap());
    });
    group.bench_function("softmax_axis_1", |bencher| {
        bencher.iter(|| black_box(a.softmax(&[1], 1.0)).unwrap());
    });
    group.finish();
}

fn bench_indexing(c: &mut Criterion) {
    let mut group = c.benchmark_group("indexing");
    let a = create_random(&[256, 256]);
    let b = create_random(&[256, 256]);

    group.bench_function("get_expr_strided", |bencher| {
        bencher.iter(|| black_box(a.get_expr(black_box("10:200:2, ::-3"))).unwrap());
    });
    group.bench_function("concat_axis_0", |bencher| {
        bencher.iter(|| black_box(ops::concat(&[&a, &b], 0)).unwrap());
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_matrix_multiply,
    bench_elementwise,
    bench_reductions,
    bench_indexing
);
criterion_main!(benches);
