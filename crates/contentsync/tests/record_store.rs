mod common;

use common::open_store;
use contentsync::config::StorageConfig;
use contentsync::{
    ContentFields, ContentKind, Entity, EntityQuery, LocalId, RecordStore, RemoteId, SiteId,
    SqliteRecordStore, StorageError, SyncError, UploadOperation, UploadRecord, UploadState,
};
use tempfile::TempDir;

fn synced(site: i64, remote: i64, kind: ContentKind, title: &str) -> Entity {
    Entity {
        local_id: LocalId::UNASSIGNED,
        remote_id: RemoteId(remote),
        site_id: SiteId(site),
        kind,
        is_local_only: false,
        is_locally_modified: false,
        fields: ContentFields::titled(title),
    }
}

#[test]
fn test_insert_assigns_increasing_local_ids() {
    let temp = TempDir::new().unwrap();
    let records = open_store(&temp);

    let a = records
        .insert(&synced(1, 1, ContentKind::Post, "a"))
        .unwrap();
    let b = records
        .insert(&synced(1, 2, ContentKind::Post, "b"))
        .unwrap();
    assert!(a.local_id.is_assigned());
    assert!(b.local_id > a.local_id);

    // Ids are never reused after a delete
    records.delete(b.local_id).unwrap();
    let c = records
        .insert(&synced(1, 3, ContentKind::Post, "c"))
        .unwrap();
    assert!(c.local_id > b.local_id);
}

#[test]
fn test_site_and_remote_id_are_unique() {
    let temp = TempDir::new().unwrap();
    let records = open_store(&temp);
    records
        .insert(&synced(1, 5, ContentKind::Post, "first"))
        .unwrap();

    let result = records.insert(&synced(1, 5, ContentKind::Post, "second"));
    assert!(matches!(result, Err(StorageError::Sqlite(_))));

    // Any number of drafts may lack a remote id
    for title in ["x", "y"] {
        records
            .insert(&Entity::local_draft(
                SiteId(1),
                ContentKind::Post,
                ContentFields::titled(title),
            ))
            .unwrap();
    }
    assert_eq!(records.count(&EntityQuery::all()).unwrap(), 3);
}

#[test]
fn test_query_filters_combine() {
    let temp = TempDir::new().unwrap();
    let records = open_store(&temp);
    records
        .insert(&synced(1, 1, ContentKind::Post, "post"))
        .unwrap();
    records
        .insert(&synced(1, 2, ContentKind::Page, "page"))
        .unwrap();
    records
        .insert(&synced(2, 1, ContentKind::Post, "other site"))
        .unwrap();
    records
        .insert(&Entity::local_draft(
            SiteId(1),
            ContentKind::Post,
            ContentFields::titled("draft"),
        ))
        .unwrap();

    let site_posts = records
        .find(&EntityQuery::site(SiteId(1)).kind(ContentKind::Post))
        .unwrap();
    assert_eq!(site_posts.len(), 2);

    let drafts = records
        .find(&EntityQuery::site(SiteId(1)).local_only(true))
        .unwrap();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].fields.title, "draft");

    let by_remote = records
        .find(&EntityQuery::all().remote_id(RemoteId(1)))
        .unwrap();
    assert_eq!(by_remote.len(), 2);

    assert_eq!(records.delete_where(&EntityQuery::site(SiteId(2))).unwrap(), 1);
    assert_eq!(records.count(&EntityQuery::all()).unwrap(), 3);
}

#[test]
fn test_fields_survive_storage() {
    let temp = TempDir::new().unwrap();
    let records = open_store(&temp);
    let mut entity = synced(1, 9, ContentKind::Media, "photo");
    entity.fields.media_url = Some("https://example.org/photo.jpg".to_string());
    entity.fields.mime_type = Some("image/jpeg".to_string());
    entity.fields.term_ids = vec![3, 4];

    let stored = records.insert(&entity).unwrap();
    let loaded = records.get(stored.local_id).unwrap().unwrap();

    assert_eq!(loaded, stored);
}

#[test]
fn test_upload_error_persists_with_kind() {
    let temp = TempDir::new().unwrap();
    let records = open_store(&temp);
    let entity = records
        .insert(&synced(1, 1, ContentKind::Post, "a"))
        .unwrap();

    let mut record = UploadRecord::new(entity.local_id, UploadOperation::Push, UploadState::Failed);
    record.last_error = Some(SyncError::NotFound("post 1 is gone".into()));
    record.attempts = 3;
    records.put_upload(&record).unwrap();

    let loaded = records.get_upload(entity.local_id).unwrap().unwrap();
    assert_eq!(loaded, record);
    assert_eq!(
        records.find_uploads(Some(UploadState::Failed)).unwrap().len(),
        1
    );
    assert!(records.find_uploads(Some(UploadState::Pending)).unwrap().is_empty());
}

#[test]
fn test_upload_requires_existing_entity() {
    let temp = TempDir::new().unwrap();
    let records = open_store(&temp);
    let record = UploadRecord::new(LocalId(12), UploadOperation::Push, UploadState::Pending);

    assert!(records.put_upload(&record).is_err());
}

#[test]
fn test_reopen_keeps_data() {
    let temp = TempDir::new().unwrap();
    let config = StorageConfig {
        db_path: temp.path().join("reopen.db"),
        ..StorageConfig::default()
    };
    {
        let records = SqliteRecordStore::open(&config.db_path, &config).unwrap();
        records.insert(&synced(1, 1, ContentKind::Post, "kept")).unwrap();
    }

    let records = SqliteRecordStore::open(&config.db_path, &config).unwrap();
    let row = records
        .find_by_remote_id(SiteId(1), RemoteId(1))
        .unwrap()
        .unwrap();
    assert_eq!(row.fields.title, "kept");
}
