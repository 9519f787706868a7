//! Benchmarks for the dispatch loop, calls, fibers and the collector.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pocketvm::{Configuration, Vm};

/// A VM that discards its output.
fn quiet_vm(config: Configuration) -> Vm {
    Vm::new(Configuration {
        stdout_write: None,
        ..config
    })
}

fn run(source: &str) {
    let mut vm = quiet_vm(Configuration::default());
    vm.run_source("@bench", source).expect("benchmark script failed");
}

fn fib_recursive(c: &mut Criterion) {
    let mut group = c.benchmark_group("fib_recursive");
    for n in [10, 15, 20].iter() {
        let source = format!(
            "def fib(n)\n  if n < 2 then return n end\n  return fib(n - 1) + fib(n - 2)\nend\nfib({})\n",
            n
        );
        group.bench_with_input(BenchmarkId::from_parameter(n), &source, |b, src| {
            b.iter(|| run(black_box(src)))
        });
    }
    group.finish();
}

fn loop_sum(c: &mut Criterion) {
    let source = "total = 0\nfor i in 0..100000 do total += i end\n";
    c.bench_function("loop_sum", |b| b.iter(|| run(black_box(source))));
}

fn method_calls(c: &mut Criterion) {
    let source = "\
class Counter
  def _init() self.n = 0 end
  def inc() self.n += 1 end
end
c = Counter()
for i in 0..20000 do c.inc() end
";
    c.bench_function("method_calls", |b| b.iter(|| run(black_box(source))));
}

fn fiber_switching(c: &mut Criterion) {
    let source = "\
def gen() while true do yield(1) end end
f = Fiber(gen)
f.run()
for i in 0..10000 do f.resume() end
";
    c.bench_function("fiber_switching", |b| b.iter(|| run(black_box(source))));
}

fn gc_pressure(c: &mut Criterion) {
    let source = "for i in 0..2000 do x = [str(i), {'k': i}, 0..i] end\n";
    let mut group = c.benchmark_group("gc_pressure");
    group.bench_function("default_heap", |b| b.iter(|| run(black_box(source))));
    group.bench_function("small_heap", |b| {
        b.iter(|| {
            let mut vm = quiet_vm(Configuration {
                initial_heap_size: 16 * 1024,
                min_heap_size: 16 * 1024,
                ..Configuration::default()
            });
            vm.run_source("@bench", black_box(source))
                .expect("benchmark script failed");
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    fib_recursive,
    loop_sum,
    method_calls,
    fiber_switching,
    gc_pressure
);
criterion_main!(benches);
