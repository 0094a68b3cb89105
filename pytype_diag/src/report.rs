use std::cell::RefCell;
use std::cmp;
use std::result;

/// An offset into the bytecode stream the (out of scope) abstract
/// interpreter was executing when it asked the lattice or the constraint
/// store to do something. Stands in for `kailua_env::Span`, which locates
/// diagnostics in source text rather than in a compiled instruction stream.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct BcOffset(pub u32);

impl From<u32> for BcOffset {
    fn from(off: u32) -> BcOffset {
        BcOffset(off)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Kind {
    Note,
    Warning,
    Error,
    Fatal,
}

/// Marker error returned once a `Fatal` diagnostic has been raised; callers
/// should stop whatever pipeline they were running. Named after
/// `kailua_diag::report::Stop` for the same reason: the type carries no
/// information of its own, it just means "a fatal diagnostic already
/// explained why".
#[must_use]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Stop;

pub type Result<T> = result::Result<T, Stop>;

pub trait Report {
    fn add(&self, kind: Kind, at: BcOffset, msg: String) -> Result<()>;

    /// True as long as no `Error` or `Fatal` diagnostic has been recorded.
    fn can_continue(&self) -> bool;
}

impl<'a, R: Report + ?Sized> Report for &'a R {
    fn add(&self, kind: Kind, at: BcOffset, msg: String) -> Result<()> {
        (**self).add(kind, at, msg)
    }
    fn can_continue(&self) -> bool {
        (**self).can_continue()
    }
}

/// Convenience entry points layered on top of `Report::add`, following
/// `kailua_diag::report::Reporter`.
pub trait Reporter: Report + Sized {
    fn fatal<Loc: Into<BcOffset>, Msg: Into<String>, T>(&self, at: Loc, msg: Msg) -> ReportMore<T> {
        let ret = self.add(Kind::Fatal, at.into(), msg.into());
        let ret = ret.map(|_| panic!("Report::fatal must return Err(Stop)"));
        ReportMore::new(self, ret)
    }

    fn error<Loc: Into<BcOffset>, Msg: Into<String>>(&self, at: Loc, msg: Msg) -> ReportMore<()> {
        ReportMore::new(self, self.add(Kind::Error, at.into(), msg.into()))
    }

    fn warn<Loc: Into<BcOffset>, Msg: Into<String>>(&self, at: Loc, msg: Msg) -> ReportMore<()> {
        ReportMore::new(self, self.add(Kind::Warning, at.into(), msg.into()))
    }

    fn note<Loc: Into<BcOffset>, Msg: Into<String>>(&self, at: Loc, msg: Msg) -> ReportMore<()> {
        ReportMore::new(self, self.add(Kind::Note, at.into(), msg.into()))
    }
}

impl<T: Report> Reporter for T {}

#[must_use]
pub struct ReportMore<'a, T> {
    report: &'a dyn Report,
    result: Result<T>,
}

impl<'a, T> ReportMore<'a, T> {
    fn new(report: &'a dyn Report, result: Result<T>) -> ReportMore<'a, T> {
        ReportMore { report, result }
    }

    pub fn error<Loc: Into<BcOffset>, Msg: Into<String>>(self, at: Loc, msg: Msg) -> ReportMore<'a, T> {
        let ret = self.report.add(Kind::Error, at.into(), msg.into());
        ReportMore::new(self.report, if let Err(e) = ret { Err(e) } else { self.result })
    }

    pub fn warn<Loc: Into<BcOffset>, Msg: Into<String>>(self, at: Loc, msg: Msg) -> ReportMore<'a, T> {
        let ret = self.report.add(Kind::Warning, at.into(), msg.into());
        ReportMore::new(self.report, if let Err(e) = ret { Err(e) } else { self.result })
    }

    pub fn done(self) -> Result<T> {
        self.result
    }
}

/// Collects diagnostics in memory, for tests and for callers that want to
/// decide how to present them themselves.
pub struct CollectedReport {
    collected: RefCell<Vec<(Kind, BcOffset, String)>>,
}

impl CollectedReport {
    pub fn new() -> CollectedReport {
        CollectedReport { collected: RefCell::new(Vec::new()) }
    }

    pub fn into_reports(self) -> Vec<(Kind, BcOffset, String)> {
        self.collected.into_inner()
    }
}

impl Default for CollectedReport {
    fn default() -> CollectedReport {
        CollectedReport::new()
    }
}

impl Report for CollectedReport {
    fn add(&self, kind: Kind, at: BcOffset, msg: String) -> Result<()> {
        self.collected.borrow_mut().push((kind, at, msg));
        if kind == Kind::Fatal { Err(Stop) } else { Ok(()) }
    }

    fn can_continue(&self) -> bool {
        self.collected.borrow().iter().all(|&(kind, _, _)| kind < Kind::Error)
    }
}

/// Routes diagnostics through the `log` crate, at the level matching `Kind`.
/// This is the `pytype_store` equivalent of `kailua_diag::ConsoleReport`,
/// minus the terminal rendering: the CLI/terminal layer is explicitly out of
/// scope for this crate, but structured logging is the ambient stack
/// `kailua_types` itself depends on.
pub struct LogReport {
    maxkind: RefCell<Option<Kind>>,
}

impl LogReport {
    pub fn new() -> LogReport {
        LogReport { maxkind: RefCell::new(None) }
    }
}

impl Default for LogReport {
    fn default() -> LogReport {
        LogReport::new()
    }
}

impl Report for LogReport {
    fn add(&self, kind: Kind, at: BcOffset, msg: String) -> Result<()> {
        match kind {
            Kind::Note => log::info!("[bc {}] {}", at.0, msg),
            Kind::Warning => log::warn!("[bc {}] {}", at.0, msg),
            Kind::Error | Kind::Fatal => log::error!("[bc {}] {}", at.0, msg),
        }
        let mut maxkind = self.maxkind.borrow_mut();
        *maxkind = Some(maxkind.map_or(kind, |k| cmp::max(k, kind)));
        if kind == Kind::Fatal { Err(Stop) } else { Ok(()) }
    }

    fn can_continue(&self) -> bool {
        *self.maxkind.borrow() < Some(Kind::Error)
    }
}

/// Discards every diagnostic and treats all of them as fatal, matching
/// `kailua_diag::NoReport`'s role as "no sink was configured, stop
/// immediately rather than silently swallow the problem".
pub struct NoReport;

impl Report for NoReport {
    fn add(&self, _kind: Kind, _at: BcOffset, _msg: String) -> Result<()> {
        Err(Stop)
    }

    fn can_continue(&self) -> bool {
        true
    }
}
