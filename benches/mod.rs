/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

use criterion::{criterion_group, criterion_main};


criterion_group!(
    benches,
    ruling_bench::register_benchmarks,
    shm_bench::register_benchmarks
);
criterion_main!(benches);
