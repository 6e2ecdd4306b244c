use std::sync::Arc;

use super::{AnyTable, OpSet, OperationTable, TableKind};

macro_rules! op_set {
	(
		$(#[$meta:meta])*
		$name:ident: $kind:expr, $wrap:path {
			$($(#[$vmeta:meta])* $variant:ident => $label:literal,)+
		}
	) => {
		$(#[$meta])*
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
		pub enum $name {
			$($(#[$vmeta])* $variant,)+
		}

		impl $name {
			/// Every slot of this table kind, in slot order.
			pub const ALL: &'static [Self] = &[$(Self::$variant,)+];
		}

		impl OpSet for $name {
			const KIND: TableKind = $kind;
			const COUNT: usize = Self::ALL.len();

			fn index(self) -> usize {
				self as usize
			}

			fn name(self) -> &'static str {
				match self {
					$(Self::$variant => $label,)+
				}
			}

			fn wrap(table: Arc<OperationTable<Self>>) -> AnyTable {
				$wrap(table)
			}
		}
	};
}

op_set! {
	/// Slots of a file-level table, dispatched against an open handle.
	FileOp: TableKind::File, AnyTable::File {
		Llseek => "llseek",
		Read => "read",
		Write => "write",
		ReadDir => "readdir",
		Poll => "poll",
		Ioctl => "ioctl",
		Mmap => "mmap",
		Open => "open",
		Flush => "flush",
		Release => "release",
		Fsync => "fsync",
		Fasync => "fasync",
		Lock => "lock",
	}
}

op_set! {
	/// Slots of a node-level table, dispatched against a resource-tree node.
	NodeOp: TableKind::Node, AnyTable::Node {
		Create => "create",
		/// Resolves a child name. The neutral root answers this one with `NotFound`.
		Lookup => "lookup",
		Link => "link",
		Unlink => "unlink",
		Symlink => "symlink",
		Mkdir => "mkdir",
		Rmdir => "rmdir",
		Mknod => "mknod",
		Rename => "rename",
		ReadLink => "readlink",
		Permission => "permission",
		SetAttr => "setattr",
		GetAttr => "getattr",
	}
}
