//! Benchmarks for the Scribe presence hub live in `benches/`.
