// tests/pipeline.rs

//! End-to-end layer builds against a recording executor.

mod common;

use common::{Volume, own_user_group};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use strata::items::stat_options::build_stat_options;
use strata::items::{ForeignLayerItem, MakeDirsItem, ParentLayerItem};
use strata::{Error, Escalation, HostExecutor, Item, LayerConfig, LayerOpts, StatOptions, Subvolume, compile_items};

fn touch(path: &str) -> Item {
    Item::ForeignLayer(ForeignLayerItem::new("//layer", ["/bin/touch", path]))
}

#[test]
fn test_parent_then_foreign_touch() {
    let vol = Volume::new();
    let base = vol.parent(&[]);
    let target = vol.target("img", &[]);

    let items = vec![
        Item::ParentLayer(ParentLayerItem::new("//base", &base)),
        touch("/HELLO"),
    ];
    compile_items(items, &LayerOpts::new("//layer"), &target).unwrap();

    let calls = vol.exec.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[0].argv,
        vec![
            "btrfs".to_string(),
            "subvolume".into(),
            "snapshot".into(),
            base.display().to_string(),
            target.root().display().to_string(),
        ]
    );
    let nspawn = &calls[1].argv;
    assert!(nspawn.contains(&format!("--directory={}", target.root().display())));
    assert!(nspawn.contains(&"--user=root".to_string()));
    assert!(nspawn.ends_with(&["--".to_string(), "/bin/touch".into(), "/HELLO".into()]));

    // Nothing was protected, and nothing was fabricated
    assert!(!vol.rendered().iter().any(|c| c.starts_with("mount")));
    assert!(!target.root().join("meta").exists());
    assert!(!target.root().join("__strata__").exists());
}

#[test]
fn test_foreign_failure_under_protection_is_attributed() {
    let vol = Volume::new();
    let base = vol.parent(&["meta"]);
    let target = vol.target("img", &["meta"]);
    vol.exec.fail_when(
        "/meta/ALIEN",
        1,
        "/bin/touch: cannot touch '/meta/ALIEN': Read-only file system",
    );

    let items = vec![
        Item::ParentLayer(ParentLayerItem::new("//base", &base)),
        touch("/meta/ALIEN"),
    ];
    let err = compile_items(items, &LayerOpts::new("//layer"), &target).unwrap_err();

    assert_eq!(err.exit_code(), Some(1));
    assert!(err.to_string().starts_with("//layer: ForeignLayer phase failed"));
    assert!(matches!(err.root_cause(), Error::Command { stderr, .. } if stderr.contains("Read-only")));

    // The command ran between the read-only remount and the unmount
    let rendered = vol.rendered();
    let meta = target.root().join("meta").display().to_string();
    let pos = |cmd: &str| rendered.iter().position(|c| c == cmd).unwrap();
    let nspawn = rendered.iter().position(|c| c.starts_with("systemd-nspawn")).unwrap();
    assert!(pos(&format!("mount -o remount,bind,ro {}", meta)) < nspawn);
    assert!(pos(&format!("umount {}", meta)) > nspawn);
}

#[test]
fn test_stat_options_exact_mode_recursive() {
    let temp = tempfile::tempdir().unwrap();
    let subvol = Subvolume::new(temp.path(), Arc::new(HostExecutor::new(Escalation::None)));
    let dir = temp.path().join("fresh");
    fs::create_dir_all(dir.join("sub")).unwrap();
    fs::write(dir.join("sub/file"), "x").unwrap();
    for path in [dir.clone(), dir.join("sub"), dir.join("sub/file")] {
        fs::set_permissions(&path, fs::Permissions::from_mode(0o777)).unwrap();
    }

    build_stat_options(&StatOptions::new(0o750, own_user_group()), &subvol, &dir, None, false).unwrap();

    for path in [dir.clone(), dir.join("sub"), dir.join("sub/file")] {
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o750, "{}", path.display());
    }
}

#[test]
fn test_same_items_same_commands() {
    let vol = Volume::new();
    let base = vol.parent(&["srv"]);
    let items = || {
        vec![
            touch("/READY"),
            Item::MakeDirs(MakeDirsItem::new("//layer", "/srv", "www")),
            Item::ParentLayer(ParentLayerItem::new("//base", &base)),
        ]
    };

    let mut runs = Vec::new();
    for name in ["one", "two"] {
        let target = vol.target(name, &["srv"]);
        vol.exec.clear();
        compile_items(items(), &LayerOpts::new("//layer"), &target).unwrap();
        let root = target.root().display().to_string();
        runs.push(
            vol.rendered()
                .into_iter()
                .map(|c| c.replace(&root, "<root>"))
                .collect::<Vec<_>>(),
        );
    }
    assert_eq!(runs[0], runs[1]);
    assert!(runs[0][0].starts_with("btrfs subvolume snapshot"));
}

#[test]
fn test_layer_file_drives_build() {
    let vol = Volume::new();
    let base = vol.parent(&["etc"]);
    let target = vol.target("img", &["etc"]);
    let config = LayerConfig::parse(&format!(
        r#"
[layer]
target = "//images:web"
build_appliance = "/vol/ba"

[[item]]
type = "rpm_action"
from_target = "//images:web"
name = "nginx"
action = "install"

[[item]]
type = "parent_layer"
from_target = "//images:base"
subvol = "{}"

[[item]]
type = "remove_path"
from_target = "//images:web"
path = "/etc/motd"
"#,
        base.display()
    ))
    .unwrap();

    compile_items(config.items, &config.layer, &target).unwrap();

    let rendered = vol.rendered();
    assert_eq!(rendered.len(), 2);
    assert!(rendered[0].starts_with("btrfs subvolume snapshot"));
    assert!(rendered[1].contains("--directory=/vol/ba"));
    assert!(rendered[1].ends_with("dnf --installroot=/__strata_target__ --assumeyes install nginx"));
}
