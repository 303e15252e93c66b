//! Test utilities for sepolicy-decompile integration tests

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

/// Result type alias for tests
pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Extract Ok value or panic with context
#[macro_export]
macro_rules! assert_ok {
    ($expr:expr) => {
        match $expr {
            Ok(v) => v,
            Err(e) => panic!("assertion failed: expected Ok, got Err({:?})", e),
        }
    };
    ($expr:expr, $msg:literal) => {
        match $expr {
            Ok(v) => v,
            Err(e) => panic!("{}: {:?}", $msg, e),
        }
    };
}

/// Extract Some value or panic with context
#[macro_export]
macro_rules! assert_some {
    ($expr:expr) => {
        match $expr {
            Some(v) => v,
            None => panic!("assertion failed: expected Some, got None"),
        }
    };
    ($expr:expr, $msg:literal) => {
        match $expr {
            Some(v) => v,
            None => panic!("{}: got None", $msg),
        }
    };
}

/// Compiled vendor policy of the sample tree
pub const VENDOR_CIL: &str = "\
; vendor policy
(type vendor_foo_client)
(typeattributeset hal_client (vendor_foo_client_30_0))
(typeattributeset domain (vendor_foo_client_30_0))
(allow vendor_foo_client_30_0 vendor_foo_hwservice_30_0 (file (read open map)))
(allow vendor_foo_client_30_0 vendor_data_file_30_0 (file (read write getattr)))
(allow vendor_foo_client_30_0 vendor_data_file_30_0 (dir (search)))
(genfscon sysfs \"/kernel/foo\" (u object_r sysfs_foo ((s0) (s0))))
(genfscon sysfs \"/kernel/bar\" (u object_r sysfs_bar ((s0) (s0))))
";

/// Expanded macros of the sample tree
pub const TE_MACROS: &str = "\
define(`hal_client_domain', `
allow $1 $2:file { read open map };
typeattribute $1 hal_client;
')
define(`rw_file_perms', `{ read write }')
";

/// Policy source of the sample tree
pub const VENDOR_TE: &str = "\
allow vendor_foo_client vendor_data_file:dir search;
";

pub const GENFS_CONTEXTS: &str = "\
genfscon sysfs /kernel/foo u:object_r:sysfs_foo:s0
";

/// Context files installed next to the compiled vendor policy
pub const VENDOR_FILE_CONTEXTS: &str = "\
/vendor/bin/hw/vendor.foo-service    u:object_r:vendor_foo_exec:s0
/vendor/bin/bar    u:object_r:vendor_bar_exec:s0
";

pub const VENDOR_HWSERVICE_CONTEXTS: &str = "\
vendor.foo::IFoo    u:object_r:vendor_foo_hwservice:s0
";

/// Source file_contexts of the sample tree
pub const FILE_CONTEXTS: &str = "\
# HALs
/vendor/bin/hw/vendor.foo-service u:object_r:vendor_foo_exec:s0
";

pub const ACCESS_VECTORS: &str = "\
class file
{
\tread
\twrite
\tgetattr
\topen
\tmap
\texecute
}

class dir
{
\tsearch
}
";

/// Write `content` to `root/relative`, creating parent directories
pub fn write_file(root: &Path, relative: &str, content: &str) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

/// Lay out a small policy tree with policy, context files, macros and sources
pub fn setup_policy_tree(root: &Path) {
    write_file(root, "vendor_sepolicy.cil", VENDOR_CIL);
    write_file(root, "public/te_macros", TE_MACROS);
    write_file(root, "vendor/foo.te", VENDOR_TE);
    write_file(root, "vendor/genfs_contexts", GENFS_CONTEXTS);
    write_file(root, "vendor/file_contexts", FILE_CONTEXTS);
    write_file(root, "selinux/vendor_file_contexts", VENDOR_FILE_CONTEXTS);
    write_file(root, "selinux/vendor_hwservice_contexts", VENDOR_HWSERVICE_CONTEXTS);
    write_file(root, "private/access_vectors", ACCESS_VECTORS);
}

/// decompile.toml for the tree written by [`setup_policy_tree`]
pub const DECOMPILE_TOML: &str = r#"
[decompile]
version = "1"
policy = ["vendor_sepolicy.cil"]
policy_version = "30.0"
macros = ["public"]
rules = ["vendor"]
contexts = ["selinux"]
access_vectors = "private/access_vectors"
"#;
