//! Property-based tests for part numbering and reassembly

use bytes::Bytes;
use partflow_core::*;
use partflow_engine::*;
use proptest::prelude::*;
use std::io::Cursor;
use std::sync::Arc;

/// Upload `data` as a resumed session whose first new part follows `offset`
async fn resume_and_upload(offset: u32, part_size: usize, data: Vec<u8>) -> (Vec<u32>, Bytes) {
    let store = Arc::new(MemoryStore::new());
    let upload_id = store
        .create_multipart_upload("media", &UploadTarget::new("prop.bin"))
        .await
        .unwrap();

    let config = UploaderConfig::new("media")
        .with_part_size(part_size)
        .with_concurrency(3);
    let uploader = Uploader::new(store.clone(), config).unwrap();

    let id = uploader
        .start_upload(
            StartUpload::new(UploadTarget::new("prop.bin"))
                .with_source(Cursor::new(data))
                .with_resume(ResumeParams::new(upload_id).with_offset(offset)),
        )
        .await
        .unwrap();

    uploader.complete_upload(id).await.unwrap();
    let mut numbers = store.uploaded_parts();
    numbers.sort();
    (numbers, store.object("media", "prop.bin").unwrap_or_default())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn props_numbering_is_gap_free_after_offset(
        offset in 0u32..100,
        part_size in 1usize..16,
        data in prop::collection::vec(any::<u8>(), 1..200)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let expected_parts = data.len().div_ceil(part_size) as u32;

        let (numbers, object) = rt.block_on(resume_and_upload(offset, part_size, data.clone()));

        let expected: Vec<u32> = (offset + 1..=offset + expected_parts).collect();
        prop_assert_eq!(numbers, expected);
        prop_assert_eq!(object.as_ref(), data.as_slice());
    }

    #[test]
    fn props_every_part_but_the_last_is_full(
        part_size in 1usize..16,
        len in 1usize..200
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let sizes = rt.block_on(async {
            let store = Arc::new(MemoryStore::new());
            let config = UploaderConfig::new("media").with_part_size(part_size);
            let uploader = Uploader::new(store.clone(), config).unwrap();
            let id = uploader
                .start_upload(
                    StartUpload::new(UploadTarget::new("sizes.bin"))
                        .with_source(Cursor::new(vec![7u8; len])),
                )
                .await
                .unwrap();
            uploader.complete_upload(id).await.unwrap();

            let mut sizes: Vec<(u32, usize)> = store
                .calls()
                .into_iter()
                .filter_map(|call| match call {
                    StoreCall::UploadPart { part_number, size, .. } => Some((part_number, size)),
                    _ => None,
                })
                .collect();
            sizes.sort();
            sizes
        });

        let (last, full) = sizes.split_last().unwrap();
        prop_assert!(full.iter().all(|(_, size)| *size == part_size));
        prop_assert_eq!(last.1, len - full.len() * part_size);
        prop_assert!(last.1 >= 1 && last.1 <= part_size);
    }
}
