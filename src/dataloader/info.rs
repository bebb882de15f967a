use super::metadata::{DatasetMetadata, LabelLookup};

pub fn print_dataset_info(name: &str, metadata: &DatasetMetadata, lookup: &LabelLookup) {
    let capacity = metadata.representative_size();
    let last = metadata.chunk_sizes.last().copied().unwrap_or(0);
    let sample_bytes = metadata.sample_len() * std::mem::size_of::<f32>();

    println!("Dataset Information: {}", name);
    println!("-------------------");
    println!("Total size: {}", metadata.total_count);
    println!("Sample shape: {:?}", metadata.sample_shape);
    println!();
    println!("Chunks: {}", metadata.num_chunks());
    println!("  Chunk size: {}", capacity);
    println!("  Last chunk size: {}", last);
    println!("  Bytes per buffer slot: {}", capacity * sample_bytes);
    println!();
    println!("Classes: {}", lookup.len());
    for (id, class) in lookup.iter() {
        println!("  {:>4}: {}", id, class);
    }
}
