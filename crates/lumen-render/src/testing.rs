// SPDX-License-Identifier: CEPL-1.0
//! Scripted contexts for exercising scheduling and recovery without a GPU.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::{Arc, Weak};

use crate::{
    BackendKind, ContextFactory, DrawCallback, FrameContext, FrameOutcome, HeadlessSurface,
    NativeFrame, NullContext, PresentationContext, PresentationState, RenderSize, SharedSurface,
    SkipReason, StateCell, SurfaceHandle, DEFAULT_CLEAR,
};

pub type Script<T> = Rc<RefCell<VecDeque<T>>>;

#[derive(Debug, Default)]
pub struct MockLog {
    pub attaches: u32,
    pub detaches: u32,
    pub reattaches: u32,
    pub renders: u32,
    pub resizes: Vec<RenderSize>,
    pub callbacks_run: u32,
}

pub struct MockContext {
    kind: BackendKind,
    state: Arc<StateCell>,
    log: Rc<RefCell<MockLog>>,
    attach_script: Script<bool>,
    render_script: Script<FrameOutcome>,
    surface: Option<Weak<dyn SurfaceHandle>>,
    attached: bool,
    clear: [f32; 4],
    callbacks: Vec<DrawCallback>,
    error: String,
}

impl MockContext {
    pub fn new(kind: BackendKind, state: Arc<StateCell>) -> (Self, Rc<RefCell<MockLog>>) {
        let log = Rc::new(RefCell::new(MockLog::default()));
        let ctx = Self::scripted(kind, state, Rc::clone(&log), Script::default(), Script::default());
        (ctx, log)
    }

    fn scripted(
        kind: BackendKind,
        state: Arc<StateCell>,
        log: Rc<RefCell<MockLog>>,
        attach_script: Script<bool>,
        render_script: Script<FrameOutcome>,
    ) -> Self {
        Self {
            kind,
            state,
            log,
            attach_script,
            render_script,
            surface: None,
            attached: false,
            clear: DEFAULT_CLEAR,
            callbacks: Vec::new(),
            error: String::new(),
        }
    }

    pub fn unattached() -> (Self, Rc<RefCell<MockLog>>) {
        Self::new(BackendKind::Vulkan, Arc::new(StateCell::new()))
    }

    /// Attached to a leaked 800x600 headless surface.
    pub fn ready() -> (Self, Rc<RefCell<MockLog>>) {
        let (mut ctx, log) = Self::unattached();
        let surface: SharedSurface = Arc::new(HeadlessSurface::new(RenderSize::new(800, 600)));
        assert!(ctx.attach(&surface));
        std::mem::forget(surface);
        (ctx, log)
    }
}

impl PresentationContext for MockContext {
    fn backend(&self) -> BackendKind {
        self.kind
    }

    fn state(&self) -> &Arc<StateCell> {
        &self.state
    }

    fn attach(&mut self, surface: &SharedSurface) -> bool {
        self.log.borrow_mut().attaches += 1;
        self.surface = Some(Arc::downgrade(surface));
        let recovering = self.state.get() == PresentationState::Recovering;
        if !recovering {
            self.state.transition(PresentationState::Initializing);
        }
        let ok = self.attach_script.borrow_mut().pop_front().unwrap_or(true);
        if ok {
            self.attached = true;
            self.error.clear();
            self.state.transition(PresentationState::Ready);
        } else {
            self.attached = false;
            self.error = format!("{} attach scripted to fail", self.kind);
            self.state.transition(if recovering {
                PresentationState::Lost
            } else {
                PresentationState::Uninitialized
            });
        }
        ok
    }

    fn detach(&mut self) {
        self.log.borrow_mut().detaches += 1;
        self.attached = false;
        self.state.transition(PresentationState::Uninitialized);
    }

    fn reattach(&mut self) -> bool {
        self.log.borrow_mut().reattaches += 1;
        self.attached = false;
        match self.surface.as_ref().and_then(Weak::upgrade) {
            Some(surface) => self.attach(&surface),
            None => false,
        }
    }

    fn render(&mut self) -> FrameOutcome {
        self.log.borrow_mut().renders += 1;
        if !self.attached || !self.state.is_ready() {
            return FrameOutcome::Skipped(SkipReason::NotReady);
        }
        let outcome = self
            .render_script
            .borrow_mut()
            .pop_front()
            .unwrap_or(FrameOutcome::Presented);
        match outcome {
            FrameOutcome::Lost => {
                self.error = format!("{} device lost", self.kind);
                self.state.transition(PresentationState::Lost);
            }
            FrameOutcome::Presented => {
                let frame = FrameContext {
                    extent: RenderSize::new(800, 600),
                    clear: self.clear,
                    slot: 0,
                    image_index: 0,
                    native: NativeFrame::None,
                };
                for cb in &mut self.callbacks {
                    cb(&frame);
                    self.log.borrow_mut().callbacks_run += 1;
                }
            }
            FrameOutcome::Skipped(_) => {}
        }
        outcome
    }

    fn recreate_swapchain(&mut self) -> bool {
        self.attached && self.state.is_ready()
    }

    fn resize(&mut self, size: RenderSize) -> bool {
        if !self.recreate_swapchain() {
            return false;
        }
        self.log.borrow_mut().resizes.push(size);
        true
    }

    fn set_clear_colour(&mut self, r: f32, g: f32, b: f32, a: f32) {
        self.clear = [r, g, b, a];
    }

    fn clear_colour(&self) -> [f32; 4] {
        self.clear
    }

    fn add_draw_callback(&mut self, callback: DrawCallback) {
        self.callbacks.push(callback);
    }

    fn take_draw_callbacks(&mut self) -> Vec<DrawCallback> {
        std::mem::take(&mut self.callbacks)
    }

    fn last_error(&self) -> String {
        self.error.clone()
    }
}

#[derive(Default)]
pub struct FactoryLog {
    pub created: Vec<(BackendKind, Rc<RefCell<MockLog>>)>,
}

impl FactoryLog {
    pub fn kinds(&self) -> Vec<BackendKind> {
        self.created.iter().map(|(k, _)| *k).collect()
    }
}

/// Builds mock GPU contexts following per-backend scripts shared by every
/// context of that backend; software gets the real [`NullContext`].
#[derive(Default)]
pub struct MockFactory {
    pub log: Rc<RefCell<FactoryLog>>,
    attach: HashMap<BackendKind, Script<bool>>,
    render: HashMap<BackendKind, Script<FrameOutcome>>,
}

impl MockFactory {
    pub fn attach_results(mut self, kind: BackendKind, results: &[bool]) -> Self {
        self.attach.insert(kind, Rc::new(RefCell::new(results.iter().copied().collect())));
        self
    }

    pub fn render_outcomes(mut self, kind: BackendKind, outcomes: &[FrameOutcome]) -> Self {
        self.render.insert(kind, Rc::new(RefCell::new(outcomes.iter().copied().collect())));
        self
    }
}

impl ContextFactory for MockFactory {
    fn create(&mut self, kind: BackendKind, state: Arc<StateCell>) -> Box<dyn PresentationContext> {
        if kind == BackendKind::Software {
            return Box::new(NullContext::new(state));
        }
        let log = Rc::new(RefCell::new(MockLog::default()));
        self.log.borrow_mut().created.push((kind, Rc::clone(&log)));
        Box::new(MockContext::scripted(
            kind,
            state,
            log,
            Rc::clone(self.attach.entry(kind).or_default()),
            Rc::clone(self.render.entry(kind).or_default()),
        ))
    }
}
