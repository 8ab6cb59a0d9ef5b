use std::fmt;
use std::sync::Arc;

use crate::core::error::BridgeError;
use super::messages::{BeginInfo, ProgressInfo, DoneInfo, ErrorInfo};

pub type BeginHandler = Arc<dyn Fn(&BeginInfo) + Send + Sync>;
pub type ProgressHandler = Arc<dyn Fn(&ProgressInfo) + Send + Sync>;
pub type DoneHandler = Arc<dyn Fn(&DoneInfo) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&ErrorInfo) + Send + Sync>;

/// 生命周期阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerPhase {
    Begin,
    Progress,
    Done,
    Error,
}

impl HandlerPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            HandlerPhase::Begin => "begin",
            HandlerPhase::Progress => "progress",
            HandlerPhase::Done => "done",
            HandlerPhase::Error => "error",
        }
    }
}

/// 未确定阶段的回调，供按名字动态注册使用
#[derive(Clone)]
pub enum AnyHandler {
    Begin(BeginHandler),
    Progress(ProgressHandler),
    Done(DoneHandler),
    Error(ErrorHandler),
}

impl AnyHandler {
    pub fn phase(&self) -> HandlerPhase {
        match self {
            AnyHandler::Begin(_) => HandlerPhase::Begin,
            AnyHandler::Progress(_) => HandlerPhase::Progress,
            AnyHandler::Done(_) => HandlerPhase::Done,
            AnyHandler::Error(_) => HandlerPhase::Error,
        }
    }
}

impl fmt::Debug for AnyHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnyHandler({})", self.phase().as_str())
    }
}

/// 每个阶段最多一个回调，重新注册直接覆盖
#[derive(Clone, Default)]
pub struct Handlers {
    pub begin: Option<BeginHandler>,
    pub progress: Option<ProgressHandler>,
    pub done: Option<DoneHandler>,
    pub error: Option<ErrorHandler>,
}

impl Handlers {
    /// 把回调放进 `phase` 对应的槽位，阶段不符时立即失败
    pub fn install(&mut self, phase: HandlerPhase, handler: AnyHandler) -> Result<(), BridgeError> {
        match (phase, handler) {
            (HandlerPhase::Begin, AnyHandler::Begin(h)) => self.begin = Some(h),
            (HandlerPhase::Progress, AnyHandler::Progress(h)) => self.progress = Some(h),
            (HandlerPhase::Done, AnyHandler::Done(h)) => self.done = Some(h),
            (HandlerPhase::Error, AnyHandler::Error(h)) => self.error = Some(h),
            (expected, other) => {
                return Err(BridgeError::InvalidHandler {
                    expected: expected.as_str(),
                    got: other.phase().as_str(),
                });
            }
        }
        Ok(())
    }

    pub fn is_registered(&self, phase: HandlerPhase) -> bool {
        match phase {
            HandlerPhase::Begin => self.begin.is_some(),
            HandlerPhase::Progress => self.progress.is_some(),
            HandlerPhase::Done => self.done.is_some(),
            HandlerPhase::Error => self.error.is_some(),
        }
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("begin", &self.begin.is_some())
            .field("progress", &self.progress.is_some())
            .field("done", &self.done.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_matching_phase() {
        let mut handlers = Handlers::default();
        let done: DoneHandler = Arc::new(|_| {});
        handlers.install(HandlerPhase::Done, AnyHandler::Done(done.clone())).unwrap();
        assert!(handlers.is_registered(HandlerPhase::Done));
        assert!(Arc::ptr_eq(handlers.done.as_ref().unwrap(), &done));
        assert!(!handlers.is_registered(HandlerPhase::Begin));
    }

    #[test]
    fn test_install_mismatched_phase() {
        let mut handlers = Handlers::default();
        let err = handlers
            .install(HandlerPhase::Error, AnyHandler::Progress(Arc::new(|_| {})))
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidHandler { expected: "error", got: "progress" }));
        assert!(!handlers.is_registered(HandlerPhase::Error));
    }

    #[test]
    fn test_install_replaces_previous() {
        let mut handlers = Handlers::default();
        let first: BeginHandler = Arc::new(|_| {});
        let second: BeginHandler = Arc::new(|_| {});
        handlers.install(HandlerPhase::Begin, AnyHandler::Begin(first.clone())).unwrap();
        handlers.install(HandlerPhase::Begin, AnyHandler::Begin(second.clone())).unwrap();
        assert!(Arc::ptr_eq(handlers.begin.as_ref().unwrap(), &second));
        assert!(!Arc::ptr_eq(handlers.begin.as_ref().unwrap(), &first));
    }
}
