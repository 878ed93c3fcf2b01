//! The disk store behind the integrity guard, driven through the public API.

use buildbox_lib::blobstore::{BlobStore, DiskBlobStore, IntegrityGuardedStore, StoreError, read_blob};
use buildbox_lib::tree::{materialize_tree, upload_blob, upload_directory};
use tempfile::TempDir;

fn guarded_disk(temp: &TempDir) -> IntegrityGuardedStore<DiskBlobStore> {
  IntegrityGuardedStore::new(DiskBlobStore::open(temp.path().join("cas")).unwrap())
}

#[tokio::test]
async fn blobs_survive_reopening_the_store() {
  let temp = TempDir::new().unwrap();
  let digest = upload_blob(&guarded_disk(&temp), "", b"persisted".to_vec()).await.unwrap();

  let reopened = guarded_disk(&temp);

  assert_eq!(read_blob(&reopened, &digest).await.unwrap(), b"persisted");
}

#[tokio::test]
async fn corrupted_blob_on_disk_is_rejected_then_removed() {
  let temp = TempDir::new().unwrap();
  let store = guarded_disk(&temp);
  let digest = upload_blob(&store, "", b"original bytes".to_vec()).await.unwrap();
  let path = store.inner().blob_path(&digest).unwrap();
  std::fs::write(&path, b"modified bytes").unwrap();

  let err = read_blob(&store, &digest).await.unwrap_err();
  assert!(matches!(err, StoreError::Integrity(_)));

  for _ in 0..100 {
    if !path.exists() {
      break;
    }
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
  }
  assert_eq!(store.find_missing(std::slice::from_ref(&digest)).await.unwrap(), vec![digest]);
}

#[tokio::test]
async fn uploaded_tree_materializes_from_disk() {
  let temp = TempDir::new().unwrap();
  let store = guarded_disk(&temp);
  let source = temp.path().join("src");
  std::fs::create_dir_all(source.join("include")).unwrap();
  std::fs::write(source.join("include/config.h"), "#define N 3\n").unwrap();

  let root = upload_directory(&store, "", &source).await.unwrap();
  let target = temp.path().join("out");
  std::fs::create_dir(&target).unwrap();
  let stats = materialize_tree(&store, "", &root.to_wire(), &target).await.unwrap();

  assert_eq!(stats.files, 1);
  assert_eq!(std::fs::read(target.join("include/config.h")).unwrap(), b"#define N 3\n");

  buildbox_lib::platform::permissions::remove_tree(&target).unwrap();
}
