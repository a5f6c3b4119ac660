use rxevm::host::{HeadlessIo, ManualClock};
use rxevm::runner::Runner;
use rxevm::vm::asm::{CodeBuilder, ImageBuilder};
use rxevm::vm::{CompareMode, SlotType, Vm};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

#[derive(Serialize)]
struct BenchmarkResult {
    name: String,
    instructions: u64,
    vm_secs: f64,
    instructions_per_sec: f64,
    rust_time_secs: f64,
}

#[derive(Serialize)]
struct BenchmarkOutput {
    results: Vec<BenchmarkResult>,
}

// Rust reference implementations

fn rust_sum_loop() {
    let mut sum: i32 = 0;
    for i in 0..1_000_000 {
        sum = sum.wrapping_add(i);
    }
    eprintln!("{}", sum);
}

fn rust_nested_loop() {
    let mut sum: i32 = 0;
    for i in 0..500 {
        for j in 0..500 {
            sum = sum.wrapping_add(i * j);
        }
    }
    eprintln!("{}", sum);
}

fn rust_array_scan() {
    let data = vec![3u8; 1000];
    let mut sum: i32 = 0;
    for _ in 0..200 {
        for &v in &data {
            sum += i32::from(v);
        }
    }
    eprintln!("{}", sum);
}

fn time_rust<F: FnOnce()>(f: F) -> f64 {
    let start = Instant::now();
    f();
    start.elapsed().as_secs_f64()
}

// Bytecode versions

fn sum_loop() -> ImageBuilder {
    let mut b = ImageBuilder::new();
    let i = b.zeroed(SlotType::SLong);
    let sum = b.zeroed(SlotType::SLong);
    let one = b.scalar(SlotType::SLong, 1);
    let n = b.scalar(SlotType::SLong, 1_000_000);
    let mut code = CodeBuilder::new();
    code.add(sum, sum, i).add(i, i, one);
    let back = -(code.len() as i16);
    code.brcmp(CompareMode::Less, back, i, n).stop();
    b.clump(&code, &[]);
    b
}

fn nested_loop() -> ImageBuilder {
    let mut b = ImageBuilder::new();
    let i = b.zeroed(SlotType::SLong);
    let j = b.zeroed(SlotType::SLong);
    let t = b.zeroed(SlotType::SLong);
    let sum = b.zeroed(SlotType::SLong);
    let one = b.scalar(SlotType::SLong, 1);
    let n = b.scalar(SlotType::SLong, 500);
    let mut code = CodeBuilder::new();
    let outer = code.len();
    code.set(j, 0);
    let inner = code.len();
    code.mul(t, i, j).add(sum, sum, t).add(j, j, one);
    let here = code.len();
    code.brcmp(CompareMode::Less, inner as i16 - here as i16, j, n);
    code.add(i, i, one);
    let here = code.len();
    code.brcmp(CompareMode::Less, outer as i16 - here as i16, i, n)
        .stop();
    b.clump(&code, &[]);
    b
}

fn array_scan() -> ImageBuilder {
    let mut b = ImageBuilder::new();
    let data = b.array(SlotType::UByte, &[]);
    let three = b.scalar(SlotType::UByte, 3);
    let len = b.scalar(SlotType::UWord, 1000);
    let i = b.zeroed(SlotType::SLong);
    let round = b.zeroed(SlotType::SLong);
    let v = b.zeroed(SlotType::SLong);
    let sum = b.zeroed(SlotType::SLong);
    let one = b.scalar(SlotType::SLong, 1);
    let rounds = b.scalar(SlotType::SLong, 200);
    let mut code = CodeBuilder::new();
    code.arrinit(data, three, len);
    let outer = code.len();
    code.set(i, 0);
    let inner = code.len();
    code.index(v, data, i).add(sum, sum, v).add(i, i, one);
    let here = code.len();
    code.brcmp(CompareMode::Less, inner as i16 - here as i16, i, len);
    code.add(round, round, one);
    let here = code.len();
    code.brcmp(CompareMode::Less, outer as i16 - here as i16, round, rounds)
        .stop();
    b.clump(&code, &[]);
    b
}

fn run_vm_benchmark(name: &str, b: &ImageBuilder, rust_time: f64) -> BenchmarkResult {
    let image = Arc::new(b.build());
    let vm = match Vm::new(image, HeadlessIo::new(), ManualClock::default()) {
        Ok(vm) => vm,
        Err(e) => {
            eprintln!("VM benchmark {} failed to load: {}", name, e);
            std::process::exit(1);
        }
    };
    let mut runner = Runner::new(vm);

    let start = Instant::now();
    let summary = runner.run_to_completion();
    let elapsed = start.elapsed().as_secs_f64();

    if summary.outcome.is_failure() {
        eprintln!("VM benchmark {} failed: {:?}", name, summary.outcome);
    }

    BenchmarkResult {
        name: name.to_string(),
        instructions: summary.steps,
        vm_secs: elapsed,
        instructions_per_sec: summary.steps as f64 / elapsed.max(f64::EPSILON),
        rust_time_secs: rust_time,
    }
}

fn main() {
    let results = vec![
        run_vm_benchmark("sum_loop", &sum_loop(), time_rust(rust_sum_loop)),
        run_vm_benchmark("nested_loop", &nested_loop(), time_rust(rust_nested_loop)),
        run_vm_benchmark("array_scan", &array_scan(), time_rust(rust_array_scan)),
    ];

    let output = BenchmarkOutput { results };
    match serde_json::to_string_pretty(&output) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("failed to serialize results: {}", e),
    }
}
