//! Method tables and the universal method implementations.

use shv_rpc::{DirEntry, RpcErrorCode};

use crate::com::RequestScope;
use crate::error::Result;
use crate::tree::{Node, NodeKind};

/// Method is a value getter.
pub const METHOD_GETTER: i64 = 1 << 1;
/// Method is a value setter.
pub const METHOD_SETTER: i64 = 1 << 2;

pub const ACCESS_BROWSE: i64 = 1;
pub const ACCESS_READ: i64 = 8;
pub const ACCESS_WRITE: i64 = 16;
pub const ACCESS_COMMAND: i64 = 24;

/// A method implementation. Handlers consume the request payload from the
/// scope and emit exactly one reply; `rid` is echoed into it.
pub type MethodHandler = fn(&mut RequestScope<'_>, &mut Node, i64) -> Result<()>;

/// One entry of a node's method table.
pub struct MethodDesc {
    pub name: &'static str,
    pub flags: i64,
    pub param: Option<&'static str>,
    pub result: Option<&'static str>,
    pub access: i64,
    pub handler: MethodHandler,
}

impl MethodDesc {
    pub(crate) fn dir_entry(&self) -> DirEntry<'static> {
        DirEntry {
            name: self.name,
            flags: self.flags,
            param: self.param,
            result: self.result,
            access: self.access,
        }
    }
}

/// Sorted-by-name method set. Tables are declared as statics; keep the
/// entries in alphabetical order, lookup is a binary search.
pub struct MethodTable {
    methods: &'static [MethodDesc],
}

impl MethodTable {
    pub const fn new(methods: &'static [MethodDesc]) -> Self {
        MethodTable { methods }
    }

    pub fn lookup(&self, name: &str) -> Option<&'static MethodDesc> {
        let at = self
            .methods
            .binary_search_by(|m| m.name.cmp(name))
            .ok()?;
        Some(&self.methods[at])
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static MethodDesc> {
        self.methods.iter()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// `ls`: names of the node's children as a list of strings.
pub fn ls(scope: &mut RequestScope<'_>, node: &mut Node, rid: i64) -> Result<()> {
    scope.drain_params()?;
    scope.reply_str_list(rid, node.child_names())
}

/// `dir`: descriptors of the node's methods.
pub fn dir(scope: &mut RequestScope<'_>, node: &mut Node, rid: i64) -> Result<()> {
    scope.drain_params()?;
    scope.reply_dir(rid, node.methods().iter().map(MethodDesc::dir_entry))
}

/// `typeName` of a typed parameter node.
pub fn type_name(scope: &mut RequestScope<'_>, node: &mut Node, rid: i64) -> Result<()> {
    scope.drain_params()?;
    match &node.kind {
        NodeKind::TypedValue(tv) => scope.reply_str(rid, tv.type_name()),
        _ => scope.reply_error(
            rid,
            RpcErrorCode::MethodCallException,
            Some("Node is not a parameter."),
        ),
    }
}

/// `get` of a typed double parameter.
pub fn double_get(scope: &mut RequestScope<'_>, node: &mut Node, rid: i64) -> Result<()> {
    scope.drain_params()?;
    match &node.kind {
        NodeKind::TypedValue(tv) => scope.reply_double(rid, tv.get()),
        _ => scope.reply_error(
            rid,
            RpcErrorCode::MethodCallException,
            Some("Node is not a parameter."),
        ),
    }
}

/// `set` of a typed double parameter. Int, UInt, Decimal and Double
/// parameters are accepted; the stored value is echoed back.
pub fn double_set(scope: &mut RequestScope<'_>, node: &mut Node, rid: i64) -> Result<()> {
    let params = scope.drain_params()?;
    match &node.kind {
        NodeKind::TypedValue(tv) => match params.double {
            Some(v) => {
                tv.set(v);
                scope.reply_double(rid, v)
            }
            None => scope.reply_error(
                rid,
                RpcErrorCode::InvalidParams,
                Some("Expected a numeric parameter."),
            ),
        },
        _ => scope.reply_error(
            rid,
            RpcErrorCode::MethodCallException,
            Some("Node is not a parameter."),
        ),
    }
}

pub const LS_DESC: MethodDesc = MethodDesc {
    name: "ls",
    flags: 0,
    param: None,
    result: None,
    access: ACCESS_BROWSE,
    handler: ls,
};

pub const DIR_DESC: MethodDesc = MethodDesc {
    name: "dir",
    flags: 0,
    param: None,
    result: None,
    access: ACCESS_BROWSE,
    handler: dir,
};

pub const TYPE_NAME_DESC: MethodDesc = MethodDesc {
    name: "typeName",
    flags: METHOD_GETTER,
    param: None,
    result: Some("s"),
    access: ACCESS_READ,
    handler: type_name,
};

pub const DOUBLE_GET_DESC: MethodDesc = MethodDesc {
    name: "get",
    flags: METHOD_GETTER,
    param: None,
    result: Some("d"),
    access: ACCESS_READ,
    handler: double_get,
};

pub const DOUBLE_SET_DESC: MethodDesc = MethodDesc {
    name: "set",
    flags: METHOD_SETTER,
    param: Some("d|f"),
    result: None,
    access: ACCESS_WRITE,
    handler: double_set,
};

/// Table for plain directory nodes, root included.
pub static DIR_LS_DMAP: MethodTable = MethodTable::new(&[DIR_DESC, LS_DESC]);

/// Table for read-write double parameters.
pub static DOUBLE_DMAP: MethodTable = MethodTable::new(&[
    DIR_DESC,
    DOUBLE_GET_DESC,
    LS_DESC,
    DOUBLE_SET_DESC,
    TYPE_NAME_DESC,
]);

/// Table for read-only double parameters.
pub static DOUBLE_READ_ONLY_DMAP: MethodTable =
    MethodTable::new(&[DIR_DESC, DOUBLE_GET_DESC, LS_DESC, TYPE_NAME_DESC]);
