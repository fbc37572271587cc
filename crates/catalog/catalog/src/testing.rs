use chrono::{DateTime, Duration, Utc};

use strongbox_core::{ArtifactId, ArtifactRoot, ExportArtifact, ExportFormat, OwnerId};

use crate::error::CatalogError;
use crate::store::{ArtifactCatalog, Page};

/// Build a valid artifact for `owner` whose directory sits at
/// `{root}/{owner}/{stamp}`.
pub fn test_artifact(
    root: &ArtifactRoot,
    owner: &str,
    stamp: &str,
    created_at: DateTime<Utc>,
) -> ExportArtifact {
    let id = ArtifactId::new(format!("{owner}/{stamp}"));
    let dir = root
        .artifact_dir(&id)
        .unwrap_or_else(|e| panic!("test artifact id {id} is invalid: {e}"));
    ExportArtifact {
        id,
        owner_id: OwnerId::from(owner),
        format: ExportFormat::Json,
        created_at,
        directory_path: dir.to_string_lossy().into_owned(),
        record_count: 10,
        media_count: 1,
        size_bytes: 2048,
        date_range_start: None,
        date_range_end: None,
        manifest_path: None,
    }
}

/// Owner names unique to one run so persistent backends can be reused.
fn unique_owner(prefix: &str) -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("{prefix}-{nanos}")
}

/// Run the full artifact catalog conformance test suite.
///
/// Call this from your backend's test module with a fresh catalog instance
/// configured with `root`.
///
/// # Errors
///
/// Returns an error if a backend call fails unexpectedly.
pub async fn run_catalog_conformance_tests(
    catalog: &dyn ArtifactCatalog,
    root: &ArtifactRoot,
) -> Result<(), CatalogError> {
    test_get_missing(catalog).await?;
    test_create_and_get(catalog, root).await?;
    test_create_duplicate(catalog, root).await?;
    test_create_rejects_unconfined_paths(catalog, root).await?;
    test_create_accepts_structured_owner_ids(catalog, root).await?;
    test_list_is_owner_scoped_and_newest_first(catalog, root).await?;
    test_list_pagination(catalog, root).await?;
    test_list_tie_break_by_id(catalog, root).await?;
    test_delete_twice(catalog, root).await?;
    test_owners(catalog, root).await?;
    Ok(())
}

async fn test_get_missing(catalog: &dyn ArtifactCatalog) -> Result<(), CatalogError> {
    let result = catalog
        .get_by_id(&ArtifactId::from("nobody/19700101-000000"))
        .await;
    assert!(
        matches!(result, Err(CatalogError::NotFound(_))),
        "get on missing id should return NotFound"
    );
    Ok(())
}

async fn test_create_and_get(
    catalog: &dyn ArtifactCatalog,
    root: &ArtifactRoot,
) -> Result<(), CatalogError> {
    let owner = unique_owner("create");
    let artifact = test_artifact(root, &owner, "20240101-000000", Utc::now());
    catalog.create(&artifact).await?;

    let fetched = catalog.get_by_id(&artifact.id).await?;
    assert_eq!(fetched.id, artifact.id);
    assert_eq!(fetched.owner_id, artifact.owner_id);
    assert_eq!(fetched.format, artifact.format);
    assert_eq!(fetched.directory_path, artifact.directory_path);
    assert_eq!(fetched.record_count, artifact.record_count);
    assert_eq!(fetched.size_bytes, artifact.size_bytes);
    assert_eq!(
        fetched.created_at.timestamp_micros(),
        artifact.created_at.timestamp_micros()
    );
    Ok(())
}

async fn test_create_duplicate(
    catalog: &dyn ArtifactCatalog,
    root: &ArtifactRoot,
) -> Result<(), CatalogError> {
    let owner = unique_owner("dup");
    let artifact = test_artifact(root, &owner, "20240101-000000", Utc::now());
    catalog.create(&artifact).await?;
    let second = catalog.create(&artifact).await;
    assert!(
        matches!(second, Err(CatalogError::Duplicate(_))),
        "second create with the same id should return Duplicate"
    );
    Ok(())
}

async fn test_create_rejects_unconfined_paths(
    catalog: &dyn ArtifactCatalog,
    root: &ArtifactRoot,
) -> Result<(), CatalogError> {
    let owner = unique_owner("unsafe");
    let base = test_artifact(root, &owner, "20240101-000000", Utc::now());

    for path in [
        String::new(),
        format!("{owner}/../other/20240101-000000"),
        "/etc/passwd".to_owned(),
        format!("{owner}/20240101-000000\0"),
    ] {
        let mut artifact = base.clone();
        artifact.directory_path.clone_from(&path);
        let result = catalog.create(&artifact).await;
        assert!(
            matches!(result, Err(CatalogError::Validation(_))),
            "create with directory {path:?} should fail validation"
        );
    }

    let result = catalog.get_by_id(&base.id).await;
    assert!(
        matches!(result, Err(CatalogError::NotFound(_))),
        "rejected artifacts must not be persisted"
    );
    Ok(())
}

async fn test_create_accepts_structured_owner_ids(
    catalog: &dyn ArtifactCatalog,
    root: &ArtifactRoot,
) -> Result<(), CatalogError> {
    for prefix in ["did:plc:abc123", "zoë"] {
        let owner = unique_owner(prefix);
        let artifact = test_artifact(root, &owner, "20240101-000000", Utc::now());
        catalog.create(&artifact).await?;

        let listed = catalog
            .list_by_owner(&OwnerId::new(owner.clone()), Page::new(10, 0))
            .await?;
        assert_eq!(listed.len(), 1, "owner {owner:?} should see its artifact");
        assert_eq!(listed[0].id, artifact.id);
    }
    Ok(())
}

async fn test_list_is_owner_scoped_and_newest_first(
    catalog: &dyn ArtifactCatalog,
    root: &ArtifactRoot,
) -> Result<(), CatalogError> {
    let owner = unique_owner("list");
    let other = unique_owner("other");
    let now = Utc::now();

    for (stamp, hours) in [("t-3h", 3), ("t-1h", 1), ("t-2h", 2)] {
        catalog
            .create(&test_artifact(
                root,
                &owner,
                stamp,
                now - Duration::hours(hours),
            ))
            .await?;
    }
    catalog
        .create(&test_artifact(root, &other, "t-0h", now))
        .await?;

    let listed = catalog
        .list_by_owner(&OwnerId::from(owner.as_str()), Page::new(50, 0))
        .await?;
    let stamps: Vec<&str> = listed
        .iter()
        .map(|a| a.id.as_str().rsplit('/').next().unwrap_or_default())
        .collect();
    assert_eq!(stamps, ["t-1h", "t-2h", "t-3h"]);
    assert!(listed.iter().all(|a| a.owner_id.as_str() == owner));
    assert!(
        listed
            .windows(2)
            .all(|w| w[0].created_at >= w[1].created_at)
    );

    let theirs = catalog
        .list_by_owner(&OwnerId::from(other.as_str()), Page::new(50, 0))
        .await?;
    assert_eq!(theirs.len(), 1);
    Ok(())
}

async fn test_list_pagination(
    catalog: &dyn ArtifactCatalog,
    root: &ArtifactRoot,
) -> Result<(), CatalogError> {
    let owner = unique_owner("page");
    let now = Utc::now();
    for i in 0..5 {
        catalog
            .create(&test_artifact(
                root,
                &owner,
                &format!("p{i}"),
                now - Duration::minutes(i),
            ))
            .await?;
    }
    let owner = OwnerId::from(owner.as_str());

    let first = catalog.list_by_owner(&owner, Page::new(2, 0)).await?;
    let second = catalog.list_by_owner(&owner, Page::new(2, 2)).await?;
    let tail = catalog.list_by_owner(&owner, Page::new(2, 4)).await?;
    let beyond = catalog.list_by_owner(&owner, Page::new(2, 10)).await?;

    let ids = |v: &[ExportArtifact]| -> Vec<String> {
        v.iter()
            .map(|a| a.id.as_str().rsplit('/').next().unwrap_or_default().to_owned())
            .collect()
    };
    assert_eq!(ids(&first), ["p0", "p1"]);
    assert_eq!(ids(&second), ["p2", "p3"]);
    assert_eq!(ids(&tail), ["p4"]);
    assert!(beyond.is_empty());
    Ok(())
}

async fn test_list_tie_break_by_id(
    catalog: &dyn ArtifactCatalog,
    root: &ArtifactRoot,
) -> Result<(), CatalogError> {
    let owner = unique_owner("tie");
    let at = Utc::now();
    for stamp in ["b", "c", "a"] {
        catalog
            .create(&test_artifact(root, &owner, stamp, at))
            .await?;
    }
    let listed = catalog
        .list_by_owner(&OwnerId::from(owner.as_str()), Page::default())
        .await?;
    let stamps: Vec<&str> = listed
        .iter()
        .map(|a| a.id.as_str().rsplit('/').next().unwrap_or_default())
        .collect();
    assert_eq!(stamps, ["c", "b", "a"]);
    Ok(())
}

async fn test_delete_twice(
    catalog: &dyn ArtifactCatalog,
    root: &ArtifactRoot,
) -> Result<(), CatalogError> {
    let owner = unique_owner("delete");
    let artifact = test_artifact(root, &owner, "20240101-000000", Utc::now());
    catalog.create(&artifact).await?;

    catalog.delete(&artifact.id).await?;
    let second = catalog.delete(&artifact.id).await;
    assert!(
        matches!(second, Err(CatalogError::NotFound(_))),
        "second delete should return NotFound"
    );
    let fetched = catalog.get_by_id(&artifact.id).await;
    assert!(matches!(fetched, Err(CatalogError::NotFound(_))));
    Ok(())
}

async fn test_owners(
    catalog: &dyn ArtifactCatalog,
    root: &ArtifactRoot,
) -> Result<(), CatalogError> {
    let owner = unique_owner("owners");
    catalog
        .create(&test_artifact(root, &owner, "x", Utc::now()))
        .await?;
    let owners = catalog.owners().await?;
    assert!(owners.iter().any(|o| o.as_str() == owner));
    Ok(())
}
