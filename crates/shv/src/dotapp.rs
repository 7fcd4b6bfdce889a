//! The `.app` node: application identification and liveness methods.

use shv_chainpack::DateTime;
use shv_rpc::RpcErrorCode;

use crate::com::RequestScope;
use crate::error::Result;
use crate::methods::{
    ACCESS_BROWSE, DIR_DESC, LS_DESC, METHOD_GETTER, MethodDesc, MethodTable,
};
use crate::tree::{Children, Node, NodeKind};

/// SHV version implemented by this library.
pub const SHV_VERSION_MAJOR: i64 = 3;
pub const SHV_VERSION_MINOR: i64 = 0;

type DateProvider = Box<dyn Fn() -> DateTime + Send>;

/// State of the `.app` node.
pub struct DotAppNode {
    pub app_name: String,
    pub app_version: String,
    date_provider: Option<DateProvider>,
}

impl DotAppNode {
    pub fn new(app_name: impl Into<String>, app_version: impl Into<String>) -> Self {
        DotAppNode {
            app_name: app_name.into(),
            app_version: app_version.into(),
            date_provider: None,
        }
    }

    /// Serve `date` from the given closure.
    pub fn with_date_provider(mut self, provider: impl Fn() -> DateTime + Send + 'static) -> Self {
        self.date_provider = Some(Box::new(provider));
        self
    }

    /// Serve `date` from the system clock.
    pub fn with_date_now(self) -> Self {
        self.with_date_provider(|| {
            DateTime::from_offset_date_time(time::OffsetDateTime::now_utc())
        })
    }
}

fn with_app<'n>(
    scope: &mut RequestScope<'_>,
    node: &'n mut Node,
    rid: i64,
) -> Result<Option<&'n mut DotAppNode>> {
    match &mut node.kind {
        NodeKind::DotApp(app) => Ok(Some(app)),
        _ => {
            scope.reply_error(
                rid,
                RpcErrorCode::MethodCallException,
                Some("Node is not an application node."),
            )?;
            Ok(None)
        }
    }
}

fn app_name(scope: &mut RequestScope<'_>, node: &mut Node, rid: i64) -> Result<()> {
    scope.drain_params()?;
    match with_app(scope, node, rid)? {
        Some(app) => {
            let name = app.app_name.clone();
            scope.reply_str(rid, &name)
        }
        None => Ok(()),
    }
}

fn app_version(scope: &mut RequestScope<'_>, node: &mut Node, rid: i64) -> Result<()> {
    scope.drain_params()?;
    match with_app(scope, node, rid)? {
        Some(app) => {
            let version = app.app_version.clone();
            scope.reply_str(rid, &version)
        }
        None => Ok(()),
    }
}

fn ping(scope: &mut RequestScope<'_>, _node: &mut Node, rid: i64) -> Result<()> {
    scope.drain_params()?;
    scope.reply_empty(rid)
}

fn date(scope: &mut RequestScope<'_>, node: &mut Node, rid: i64) -> Result<()> {
    scope.drain_params()?;
    match with_app(scope, node, rid)? {
        Some(app) => match &app.date_provider {
            Some(provider) => {
                let now = provider();
                scope.reply_result(rid, |w| w.write_datetime(now))
            }
            None => scope.reply_error(
                rid,
                RpcErrorCode::NotImplemented,
                Some("Date provider not installed."),
            ),
        },
        None => Ok(()),
    }
}

fn shv_version_major(scope: &mut RequestScope<'_>, _node: &mut Node, rid: i64) -> Result<()> {
    scope.drain_params()?;
    scope.reply_int(rid, SHV_VERSION_MAJOR)
}

fn shv_version_minor(scope: &mut RequestScope<'_>, _node: &mut Node, rid: i64) -> Result<()> {
    scope.drain_params()?;
    scope.reply_int(rid, SHV_VERSION_MINOR)
}

const DATE_DESC: MethodDesc = MethodDesc {
    name: "date",
    flags: 0,
    param: None,
    result: Some("t"),
    access: ACCESS_BROWSE,
    handler: date,
};

const NAME_DESC: MethodDesc = MethodDesc {
    name: "name",
    flags: METHOD_GETTER,
    param: None,
    result: Some("s"),
    access: ACCESS_BROWSE,
    handler: app_name,
};

const PING_DESC: MethodDesc = MethodDesc {
    name: "ping",
    flags: 0,
    param: None,
    result: None,
    access: ACCESS_BROWSE,
    handler: ping,
};

const SHV_VERSION_MAJOR_DESC: MethodDesc = MethodDesc {
    name: "shvVersionMajor",
    flags: METHOD_GETTER,
    param: None,
    result: Some("i"),
    access: ACCESS_BROWSE,
    handler: shv_version_major,
};

const SHV_VERSION_MINOR_DESC: MethodDesc = MethodDesc {
    name: "shvVersionMinor",
    flags: METHOD_GETTER,
    param: None,
    result: Some("i"),
    access: ACCESS_BROWSE,
    handler: shv_version_minor,
};

const VERSION_DESC: MethodDesc = MethodDesc {
    name: "version",
    flags: METHOD_GETTER,
    param: None,
    result: Some("s"),
    access: ACCESS_BROWSE,
    handler: app_version,
};

/// Method table of the `.app` node.
pub static DOTAPP_DMAP: MethodTable = MethodTable::new(&[
    DATE_DESC,
    DIR_DESC,
    LS_DESC,
    NAME_DESC,
    PING_DESC,
    SHV_VERSION_MAJOR_DESC,
    SHV_VERSION_MINOR_DESC,
    VERSION_DESC,
]);

impl Node {
    /// The `.app` node; add it directly under the root.
    pub fn dot_app(app: DotAppNode) -> Node {
        let mut node = Node::new(".app", &DOTAPP_DMAP, Children::array());
        node.kind = NodeKind::DotApp(app);
        node
    }
}
