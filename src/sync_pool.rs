//! Submission tracking + fence/semaphore/command-buffer recycling (C9).
//!
//! Grounded on `graph.cpp`'s `submission`/`add_submission_`/
//! `get_successful_submission_`/`recycle_submissions_`/`get_fence_`/
//! `get_semaphore_`/`get_command_buffer_`, and `job.cpp`'s copy/move/
//! destructor ref-counting. The C++ side hand-rolls a ref count bumped in
//! every copy constructor and dropped in every destructor; in Rust that
//! collapses to `Clone`/`Drop` on [`Job`] and [`PendingWorkload`], both of
//! which hold a shared handle into the same pool the graph owns.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use ash::vk;

use crate::device::GpuDevice;
use crate::error::abort_on_err;

struct Submission {
    fence: vk::Fence,
    ref_count: u32,
    active: bool,
    semaphores: Vec<vk::Semaphore>,
    cmdbufs: Vec<vk::CommandBuffer>,
}

struct Inner {
    submissions: Vec<Submission>,
    free_cmdbufs: Vec<vk::CommandBuffer>,
    free_semaphores: Vec<vk::Semaphore>,
    free_fences: HashSet<vk::Fence>,
}

/// Owns every fence/semaphore/command-buffer this graph has ever created,
/// recycling them once their submission's ref count reaches zero and its
/// fence has signaled. Shared (via `Rc<RefCell<_>>`) between the graph and
/// every live [`Job`]/[`PendingWorkload`] so ref-count bookkeeping survives
/// past the call that produced them.
pub struct SyncPool {
    inner: RefCell<Inner>,
}

impl SyncPool {
    pub fn new() -> Rc<SyncPool> {
        Rc::new(SyncPool {
            inner: RefCell::new(Inner {
                submissions: Vec::new(),
                free_cmdbufs: Vec::new(),
                free_semaphores: Vec::new(),
                free_fences: HashSet::new(),
            }),
        })
    }

    fn push_submission(inner: &mut Inner, sub: Submission) -> u32 {
        for (i, slot) in inner.submissions.iter_mut().enumerate() {
            if !slot.active {
                *slot = sub;
                return i as u32;
            }
        }
        let idx = inner.submissions.len() as u32;
        inner.submissions.push(sub);
        idx
    }

    /// Finds a submission whose jobs have all been dropped (`ref_count ==
    /// 0`) and whose fence has signaled, then moves its fence/semaphores/
    /// command buffers onto the free lists. Called lazily from every
    /// `get_*` below, matching the source's pull-based recycling (there is
    /// no background reclaim pass).
    fn recycle<D: GpuDevice>(&self, device: &D) {
        let mut inner = self.inner.borrow_mut();
        let found = inner
            .submissions
            .iter()
            .position(|s| s.active && s.ref_count == 0)
            .filter(|&i| abort_on_err("fence_status", device.fence_status(inner.submissions[i].fence)));
        if let Some(i) = found {
            let sub = &mut inner.submissions[i];
            inner.free_fences.insert(sub.fence);
            let semaphores = std::mem::take(&mut sub.semaphores);
            let cmdbufs = std::mem::take(&mut sub.cmdbufs);
            sub.fence = vk::Fence::null();
            sub.active = false;
            inner.free_semaphores.extend(semaphores);
            inner.free_cmdbufs.extend(cmdbufs);
        }
    }

    pub(crate) fn get_fence<D: GpuDevice>(&self, device: &D) -> vk::Fence {
        self.recycle(device);
        let mut inner = self.inner.borrow_mut();
        if let Some(&fence) = inner.free_fences.iter().next() {
            inner.free_fences.remove(&fence);
            return fence;
        }
        drop(inner);
        info!("created fence");
        abort_on_err("create_fence", device.create_fence(true))
    }

    pub(crate) fn get_semaphore<D: GpuDevice>(&self, device: &D) -> vk::Semaphore {
        self.recycle(device);
        let mut inner = self.inner.borrow_mut();
        if let Some(semaphore) = inner.free_semaphores.pop() {
            return semaphore;
        }
        drop(inner);
        info!("created semaphore");
        abort_on_err("create_semaphore", device.create_semaphore())
    }

    pub(crate) fn get_command_buffer<D: GpuDevice>(&self, device: &D) -> vk::CommandBuffer {
        self.recycle(device);
        let mut inner = self.inner.borrow_mut();
        if let Some(cmd) = inner.free_cmdbufs.pop() {
            return cmd;
        }
        drop(inner);
        info!("created command buffer");
        abort_on_err("allocate_command_buffer", device.allocate_command_buffer())
    }

    /// Registers a brand-new submission and returns its slot index.
    pub(crate) fn add_submission(
        &self,
        fence: vk::Fence,
        ref_count: u32,
        semaphores: Vec<vk::Semaphore>,
        cmdbufs: Vec<vk::CommandBuffer>,
    ) -> u32 {
        let mut inner = self.inner.borrow_mut();
        Self::push_submission(
            &mut inner,
            Submission {
                fence,
                ref_count,
                active: true,
                semaphores,
                cmdbufs,
            },
        )
    }

    fn incref(&self, submission_idx: u32) {
        let mut inner = self.inner.borrow_mut();
        inner.submissions[submission_idx as usize].ref_count += 1;
    }

    pub(crate) fn decref(&self, submission_idx: u32) {
        let mut inner = self.inner.borrow_mut();
        let slot = &mut inner.submissions[submission_idx as usize];
        assert!(slot.ref_count > 0, "submission ref count underflow");
        slot.ref_count -= 1;
    }

    pub(crate) fn fence_of(&self, submission_idx: u32) -> vk::Fence {
        self.inner.borrow().submissions[submission_idx as usize].fence
    }
}

/// The result of `Graph::end`: one recorded command buffer plus the
/// semaphore that signals when it finishes, ready to hand to `submit`.
///
/// `Clone` bumps the backing submission's ref count; `Drop` releases it —
/// the Rust equivalent of the source's hand-written copy-ctor/destructor
/// pair. A job not yet submitted carries no submission (`submission_idx =
/// None`) the way the source uses `submission_idx_ == -1`.
pub struct Job {
    pool: Rc<SyncPool>,
    pub(crate) cmdbuf: vk::CommandBuffer,
    pub(crate) finished_semaphore: vk::Semaphore,
    pub(crate) end_stage: vk::PipelineStageFlags,
    pub(crate) fence: vk::Fence,
    submission_idx: Option<u32>,
}

impl Job {
    pub(crate) fn new(
        pool: Rc<SyncPool>,
        cmdbuf: vk::CommandBuffer,
        finished_semaphore: vk::Semaphore,
        end_stage: vk::PipelineStageFlags,
    ) -> Job {
        Job {
            pool,
            cmdbuf,
            finished_semaphore,
            end_stage,
            fence: vk::Fence::null(),
            submission_idx: None,
        }
    }

    pub(crate) fn set_submission(&mut self, submission_idx: u32, fence: vk::Fence) {
        self.submission_idx = Some(submission_idx);
        self.fence = fence;
    }

    pub(crate) fn submission_idx(&self) -> Option<u32> {
        self.submission_idx
    }

    /// The command buffer this job recorded into, or null for a job with no
    /// commands (an acquire or placeholder job). Exposed so test code can
    /// inspect what a [`crate::device::mock::MockDevice`] recorded for it.
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.cmdbuf
    }

    /// The pipeline stage this job's work finishes at.
    pub fn end_stage(&self) -> vk::PipelineStageFlags {
        self.end_stage
    }

    /// The fence that signals once this job's submission completes, or
    /// `vk::Fence::null()` if it was never submitted.
    pub fn fence(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until this job's fence signals, then releases its ref on the
    /// submission (matching `job::wait`'s eager release instead of waiting
    /// for `Drop`).
    pub fn wait<D: GpuDevice>(&mut self, device: &D) {
        abort_on_err("wait_fence", device.wait_fence(self.fence));
        if let Some(idx) = self.submission_idx.take() {
            self.pool.decref(idx);
        }
    }
}

impl Clone for Job {
    fn clone(&self) -> Job {
        if let Some(idx) = self.submission_idx {
            self.pool.incref(idx);
        }
        Job {
            pool: self.pool.clone(),
            cmdbuf: self.cmdbuf,
            finished_semaphore: self.finished_semaphore,
            end_stage: self.end_stage,
            fence: self.fence,
            submission_idx: self.submission_idx,
        }
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        if let Some(idx) = self.submission_idx.take() {
            self.pool.decref(idx);
        }
    }
}

/// A submitted group of jobs, returned by `Graph::submit`. Ref-counts the
/// same way [`Job`] does.
pub struct PendingWorkload {
    pool: Rc<SyncPool>,
    pub(crate) fence: vk::Fence,
    submission_idx: Option<u32>,
}

impl PendingWorkload {
    pub(crate) fn new(pool: Rc<SyncPool>, fence: vk::Fence, submission_idx: u32) -> PendingWorkload {
        PendingWorkload {
            pool,
            fence,
            submission_idx: Some(submission_idx),
        }
    }

    pub fn wait<D: GpuDevice>(&mut self, device: &D) {
        abort_on_err("wait_fence", device.wait_fence(self.fence));
        if let Some(idx) = self.submission_idx.take() {
            self.pool.decref(idx);
        }
    }
}

impl Clone for PendingWorkload {
    fn clone(&self) -> PendingWorkload {
        if let Some(idx) = self.submission_idx {
            self.pool.incref(idx);
        }
        PendingWorkload {
            pool: self.pool.clone(),
            fence: self.fence,
            submission_idx: self.submission_idx,
        }
    }
}

impl Drop for PendingWorkload {
    fn drop(&mut self) {
        if let Some(idx) = self.submission_idx.take() {
            self.pool.decref(idx);
        }
    }
}
