#![no_main]
use libfuzzer_sys::fuzz_target;
use cert_compress::decompress_chain;

fuzz_target!(|data: &[u8]| {
    let cache = [b"cached root".to_vec(), b"cached intermediate".to_vec()];
    let _ = decompress_chain(data, &cache);
});
