use anyhow::Result;
use log::{debug, info, warn};

use super::{DomainPlan, HookSpec, ProgramCollection};
use crate::domain::{AttachPolicy, TraceDomain};

/// A live binding of a program to a kernel hook.
pub struct Attachment<L> {
    pub domain: TraceDomain,
    pub program: String,
    pub target: String,
    link: L,
}

/// Owns every attachment made during setup, in attach order.
pub struct AttachmentManager<L> {
    attachments: Vec<Attachment<L>>,
}

impl<L> Default for AttachmentManager<L> {
    fn default() -> Self {
        Self {
            attachments: Vec::new(),
        }
    }
}

impl<L> AttachmentManager<L> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.attachments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attachments.is_empty()
    }

    pub fn count(&self, domain: TraceDomain) -> usize {
        self.attachments
            .iter()
            .filter(|a| a.domain == domain)
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attachment<L>> {
        self.attachments.iter()
    }

    /// Attaches every hook of `plan`, returning how many were bound.
    ///
    /// Hooks sharing a logical name are bound together. Under
    /// [`AttachPolicy::SkipOnError`] a failing group is rolled back and
    /// skipped. Under [`AttachPolicy::Fatal`] the error is returned and the
    /// hooks bound so far stay tracked for teardown.
    pub fn attach_plan<C>(&mut self, collection: &mut C, plan: &DomainPlan) -> Result<usize>
    where
        C: ProgramCollection<Link = L>,
    {
        for skipped in &plan.skipped {
            warn!(
                "[{}] Skipping {}: {}",
                plan.domain, skipped.logical_name, skipped.reason
            );
        }

        let policy = plan.domain.attach_policy();
        let before = self.attachments.len();

        for group in plan.hooks.chunk_by(|a, b| a.logical_name == b.logical_name) {
            match bind_group(collection, group) {
                Ok(bound) => self.attachments.extend(bound),
                Err((bound, e)) => match policy {
                    AttachPolicy::Fatal => {
                        self.attachments.extend(bound);
                        return Err(e);
                    }
                    AttachPolicy::SkipOnError => {
                        warn!("[{}] {:#}; skipping", plan.domain, e);
                        for attachment in bound.into_iter().rev() {
                            if let Err(e) = collection.detach(attachment.link) {
                                warn!(
                                    "[{}] Failed to roll back {}: {}",
                                    plan.domain, attachment.target, e
                                );
                            }
                        }
                    }
                },
            }
        }

        let attached = self.attachments.len() - before;
        info!(
            "[{}] Attached {} hooks ({} skipped by symbol table)",
            plan.domain,
            attached,
            plan.skipped.len()
        );
        Ok(attached)
    }

    /// Detaches everything in reverse attach order. Close failures are
    /// logged. A second call finds nothing to do.
    pub fn release_all<C>(&mut self, collection: &mut C) -> usize
    where
        C: ProgramCollection<Link = L>,
    {
        let mut released = 0;
        while let Some(attachment) = self.attachments.pop() {
            match collection.detach(attachment.link) {
                Ok(()) => {
                    debug!("Detached {} from {}", attachment.program, attachment.target);
                    released += 1;
                }
                Err(e) => warn!(
                    "[{}] Failed to detach {} from {}: {}",
                    attachment.domain, attachment.program, attachment.target, e
                ),
            }
        }
        released
    }
}

type GroupFailure<L> = (Vec<Attachment<L>>, anyhow::Error);

fn bind_group<C: ProgramCollection>(
    collection: &mut C,
    group: &[HookSpec],
) -> std::result::Result<Vec<Attachment<C::Link>>, GroupFailure<C::Link>> {
    let mut bound = Vec::with_capacity(group.len());
    for hook in group {
        let target = hook.target();
        match collection.attach(hook) {
            Ok(link) => {
                debug!("[{}] Attached {} to {}", hook.domain, hook.program, target);
                bound.push(Attachment {
                    domain: hook.domain,
                    program: hook.program.clone(),
                    target,
                    link,
                });
            }
            Err(e) => {
                let e = e.context(format!(
                    "Failed to attach {} program {} to {}",
                    hook.domain, hook.program, target
                ));
                return Err((bound, e));
            }
        }
    }
    Ok(bound)
}
