//! Path resolution through shares, mount points, symlinks and special names.

mod common;

use common::*;
use rdrfs_cache::directory::PIOCTL_NAME;
use rdrfs_cache::{
    AuthGroup, CacheConfig, CacheError, DriverStatus, FileType, ResolveFlags, StatusQuery,
    GLOBAL_ROOT_FID,
};

#[test]
fn test_resolve_file_in_share() {
    let fx = Fixture::standard();
    assert_eq!(fx.resolve("\\AFS\\cell\\a.txt").unwrap(), A_TXT);
    assert_eq!(fx.resolve("/AFS/cell/dir/b.txt").unwrap(), B_TXT);
}

#[test]
fn test_server_and_names_are_case_insensitive() {
    let fx = Fixture::standard();
    assert_eq!(fx.resolve("\\afs\\CELL\\A.TXT").unwrap(), A_TXT);
}

#[test]
fn test_share_resolves_to_volume_root() {
    let fx = Fixture::standard();
    let (names, fid) = fx
        .resolve_with("\\AFS\\cell", ResolveFlags::default())
        .unwrap();
    assert_eq!(fid, CELL);
    assert_eq!(names.count(), 2);
    assert!(names.current_element().unwrap().is_root());
}

#[test]
fn test_final_mount_point_without_evaluation() {
    let fx = Fixture::standard();
    let (_, fid) = fx
        .resolve_with("\\AFS\\cell\\mnt", ResolveFlags::no_reparse())
        .unwrap();
    assert_eq!(fid, MNT);
    assert_eq!(fx.resolve("\\AFS\\cell\\mnt").unwrap(), OTHER);
}

#[test]
fn test_cross_mount_point() {
    let fx = Fixture::standard();
    assert_eq!(fx.resolve("\\AFS\\cell\\mnt\\c.txt").unwrap(), C_TXT);
    assert!(fx.ctx.volumes().locate(OTHER.high_index()).is_some());
}

#[test]
fn test_global_root_only() {
    let fx = Fixture::standard();
    assert_eq!(fx.resolve("\\AFS").unwrap(), GLOBAL_ROOT_FID);
    assert_eq!(fx.resolve("\\AFS\\..").unwrap(), GLOBAL_ROOT_FID);
}

#[test]
fn test_dot_components() {
    let fx = Fixture::standard();
    assert_eq!(fx.resolve("\\AFS\\cell\\.\\dir\\..\\a.txt").unwrap(), A_TXT);
}

#[test]
fn test_relative_symlink() {
    let fx = Fixture::standard();
    assert_eq!(fx.resolve("\\AFS\\cell\\rel\\b.txt").unwrap(), B_TXT);
    assert_eq!(fx.resolve("\\AFS\\cell\\rel").unwrap(), DIR);
}

#[test]
fn test_final_symlink_without_evaluation() {
    let fx = Fixture::standard();
    let (names, fid) = fx
        .resolve_with("\\AFS\\cell\\rel", ResolveFlags::no_reparse())
        .unwrap();
    assert_eq!(fid, REL_LINK);
    assert_eq!(names.link_count(), 0);
}

#[test]
fn test_volume_absolute_symlink() {
    let fx = Fixture::standard();
    let (names, fid) = fx
        .resolve_with("\\AFS\\cell\\dir\\up", ResolveFlags::default())
        .unwrap();
    assert_eq!(fid, A_TXT);
    assert_eq!(names.link_count(), 1);
    // global root, volume root, a.txt
    assert_eq!(names.count(), 3);
}

#[test]
fn test_unc_symlink_crosses_shares() {
    let fx = Fixture::standard();
    assert_eq!(fx.resolve("\\AFS\\cell\\unc").unwrap(), C_TXT);
}

#[test]
fn test_symlink_loop_is_bounded() {
    let fx = Fixture::standard();
    let err = fx.resolve("\\AFS\\cell\\loop").unwrap_err();
    assert!(matches!(err, CacheError::TooManyLinks { limit: 30 }));
}

#[test]
fn test_link_bound_follows_config() {
    let config = CacheConfig {
        max_link_count: 1,
        ..Default::default()
    };
    let fx = Fixture::with_config(standard_authority(), config);
    assert_eq!(fx.resolve("\\AFS\\cell\\rel\\b.txt").unwrap(), B_TXT);
    let err = fx.resolve("\\AFS\\cell\\loop").unwrap_err();
    assert!(matches!(err, CacheError::TooManyLinks { limit: 1 }));
}

#[test]
fn test_sys_name_substitution() {
    let fx = Fixture::standard();
    assert_eq!(fx.resolve("\\AFS\\cell\\@sys").unwrap(), SYS_DIR);
}

#[test]
fn test_dfs_link_requires_reparse() {
    let fx = Fixture::standard();
    match fx.resolve("\\AFS\\cell\\dfs\\x").unwrap_err() {
        CacheError::Reparse { target } => assert_eq!(target, "\\\\fileserver\\share"),
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(fx.resolve("\\AFS\\cell\\dfs").unwrap(), DFS_LINK);
}

#[test]
fn test_file_in_the_middle_is_invalid() {
    let fx = Fixture::standard();
    let err = fx.resolve("\\AFS\\cell\\a.txt\\x").unwrap_err();
    assert!(matches!(err, CacheError::PathInvalid { .. }));
}

#[test]
fn test_missing_component() {
    let fx = Fixture::standard();
    assert!(fx.resolve("\\AFS\\cell\\nope").unwrap_err().is_not_found());
    assert!(fx.resolve("\\AFS\\nope").unwrap_err().is_not_found());
}

#[test]
fn test_wrong_server_and_relative_paths() {
    let fx = Fixture::standard();
    assert!(matches!(
        fx.resolve("\\OTHER\\cell").unwrap_err(),
        CacheError::PathInvalid { .. }
    ));
    assert!(matches!(
        fx.resolve("AFS\\cell").unwrap_err(),
        CacheError::PathInvalid { .. }
    ));
}

#[test]
fn test_special_shares() {
    let fx = Fixture::standard();
    let (names, _) = fx
        .resolve_with("\\AFS\\PIPE\\srvsvc", ResolveFlags::default())
        .unwrap();
    let entry = names.current().unwrap();
    assert_eq!(entry.file_name(), "PIPE\\srvsvc");
    assert_eq!(entry.object().file_type(), FileType::SpecialShareName);

    let (names, _) = fx
        .resolve_with("\\AFS\\ipc$", ResolveFlags::default())
        .unwrap();
    assert_eq!(names.current().unwrap().file_name(), "IPC$");
}

#[test]
fn test_pioctl_entry() {
    let fx = Fixture::standard();
    let path = format!("\\AFS\\cell\\{}", PIOCTL_NAME);
    let (names, _) = fx.resolve_with(&path, ResolveFlags::default()).unwrap();
    let entry = names.current().unwrap().clone();
    assert_eq!(entry.object().file_type(), FileType::PIOCtl);
    assert!(entry.is_fake());
    drop(names);
    let (again, _) = fx.resolve_with(&path, ResolveFlags::default()).unwrap();
    assert!(std::sync::Arc::ptr_eq(&entry, again.current().unwrap()));
}

#[test]
fn test_network_offline() {
    let fx = Fixture::standard();
    fx.ctx.set_network_state(false);
    assert!(matches!(
        fx.resolve("\\AFS\\cell").unwrap_err(),
        CacheError::DeviceNotReady { .. }
    ));
    assert_eq!(fx.ctx.driver_status(), DriverStatus::NotReady);
    fx.ctx.set_network_state(true);
    assert_eq!(fx.resolve("\\AFS\\cell").unwrap(), CELL);
    assert_eq!(fx.ctx.driver_status(), DriverStatus::Ready);
}

#[test]
fn test_authority_unavailable() {
    let fx = Fixture::standard();
    fx.authority.set_available(false);
    assert_eq!(fx.ctx.driver_status(), DriverStatus::NoService);
    assert!(matches!(
        fx.resolve("\\AFS\\cell").unwrap_err(),
        CacheError::DeviceNotReady { .. }
    ));
    // the failed global root enumeration left nothing behind
    fx.authority.set_available(true);
    assert_eq!(fx.resolve("\\AFS\\cell\\a.txt").unwrap(), A_TXT);
}

#[test]
fn test_second_resolution_uses_cache() {
    let fx = Fixture::standard();
    fx.resolve("\\AFS\\cell\\dir\\b.txt").unwrap();
    let evaluations = fx.authority.evaluate_calls();
    let enumerations = fx.authority.enumerate_calls();
    fx.resolve("\\AFS\\cell\\dir\\b.txt").unwrap();
    assert_eq!(fx.authority.evaluate_calls(), evaluations);
    assert_eq!(fx.authority.enumerate_calls(), enumerations);
    assert!(fx.ctx.stats().fast_path_hits > 0);
}

#[test]
fn test_name_array_releases_references() {
    let fx = Fixture::standard();
    let (names, _) = fx
        .resolve_with("\\AFS\\cell\\dir\\b.txt", ResolveFlags::default())
        .unwrap();
    let entry = names.current().unwrap().clone();
    assert_eq!(entry.open_reference_count(), 1);
    let volume = fx.ctx.volumes().locate(CELL.high_index()).unwrap();
    assert_eq!(volume.reference_count(), 4);
    drop(names);
    assert_eq!(entry.open_reference_count(), 0);
    assert_eq!(volume.reference_count(), 1);
}

#[test]
fn test_status_by_path_and_file_id() {
    let fx = Fixture::standard();
    let auth = AuthGroup::nil();
    let status = fx
        .ctx
        .get_object_status(&StatusQuery::Path("\\AFS\\cell\\a.txt".into()), &auth)
        .unwrap();
    assert_eq!(status.file_id, A_TXT);
    assert_eq!(status.file_type, FileType::File);
    assert_eq!(status.end_of_file, 100);
    assert_eq!(status.file_name.as_deref(), Some("a.txt"));

    let status = fx
        .ctx
        .get_object_status(&StatusQuery::FileId(A_TXT), &auth)
        .unwrap();
    assert_eq!(status.data_version, 1);
    assert!(status.file_name.is_none());

    let status = fx
        .ctx
        .get_object_status(&StatusQuery::FileId(CELL), &auth)
        .unwrap();
    assert_eq!(status.file_type, FileType::Directory);
}

#[test]
fn test_status_rejects_unknown_ids() {
    let fx = Fixture::standard();
    let auth = AuthGroup::nil();
    let incomplete = rdrfs_cache::FileId::new(0, 7, 5, 1);
    assert!(matches!(
        fx.ctx
            .get_object_status(&StatusQuery::FileId(incomplete), &auth)
            .unwrap_err(),
        CacheError::InvalidParameter { .. }
    ));
    assert!(matches!(
        fx.ctx
            .get_object_status(&StatusQuery::FileId(A_TXT), &auth)
            .unwrap_err(),
        CacheError::InvalidParameter { .. }
    ));
}

#[test]
fn test_status_of_mount_point_is_not_followed() {
    let fx = Fixture::standard();
    let status = fx
        .ctx
        .get_object_status(
            &StatusQuery::Path("\\AFS\\cell\\mnt".into()),
            &AuthGroup::nil(),
        )
        .unwrap();
    assert_eq!(status.file_type, FileType::MountPoint);
    assert_eq!(status.target_file_id, OTHER);
}
