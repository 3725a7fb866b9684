//! Lifecycle operations. Each is a small composition over the executor,
//! the tombstone/cache subsystems, and a handful of filesystem actions.

pub mod copy_out;
pub mod delete;
pub mod discover;
pub mod exclude;
pub mod force_push;
pub mod include;
pub mod init;
pub mod modify;
pub mod multi;
pub mod new;
pub mod rename;
pub mod status;
pub mod symlinks;
pub mod sync;

pub use copy_out::copy_from_remote;
pub use delete::delete_repo;
pub use discover::sync_missing_metas;
pub use exclude::exclude_repo;
pub use force_push::force_push_to_remote;
pub use include::include_repo;
pub use init::init_yard;
pub use modify::{add_to_group, remove_from_group, set_parents};
pub use multi::multi_sync;
pub use new::{new_repo, NewRepoOptions};
pub use rename::{rename_repo, sync_name, RenameScope, SyncNameDirection};
pub use status::{repo_status, yard_status};
pub use symlinks::create_user_symlinks;
pub use sync::{sync_repo, PartOutcome, SyncOptions};
