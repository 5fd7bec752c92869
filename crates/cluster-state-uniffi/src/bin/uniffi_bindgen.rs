/// Custom uniffi-bindgen binary for generating language bindings.
///
/// Generates Python/Kotlin/Swift bindings from the compiled
/// cluster-state-uniffi cdylib.
///
/// Usage:
///   cargo run -p cluster-state-uniffi --bin cluster-state-uniffi-bindgen --features cli -- \
///     generate --library -l python -o bindings/python \
///     target/release/libcluster_state_uniffi.so
fn main() {
    uniffi::uniffi_bindgen_main();
}
