//! Attacher, receiver and unlinker.
//!
//! Attach moves a floating entity below a parent, re-attach moves an
//! attached group, cluster or node within its bucket, detach moves a cluster
//! or node back to its bucket, destroy tears a sub-tree down leaves first.
//! Every precondition is checked before the first mutation, so a failed
//! operation leaves the tree untouched.

use std::collections::HashSet;

use canopy_types::{
    Action, ActionKind, CheckId, EntityId, EntityKind, EntityState, ParentRef, SpecError, TeamId,
};
use tracing::{debug, info};

use crate::error::TreeError;
use crate::tree::Tree;

type Result<T> = std::result::Result<T, TreeError>;

/// Target of an attach or re-attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachRequest {
    pub parent_type: EntityKind,
    pub parent_id: EntityId,
    /// Expected name of the parent; empty skips the check.
    pub parent_name: String,
}

impl AttachRequest {
    pub fn new(parent_type: EntityKind, parent_id: EntityId, parent_name: impl Into<String>) -> Self {
        Self {
            parent_type,
            parent_id,
            parent_name: parent_name.into(),
        }
    }
}

fn check_legal(child: EntityKind, parent: EntityKind) -> Result<()> {
    if child.allowed_parents().contains(&parent) {
        Ok(())
    } else {
        Err(TreeError::IllegalParent { child, parent })
    }
}

impl Tree {
    // -----------------------------------------------------------------------
    // Attach
    // -----------------------------------------------------------------------

    /// Attach the floating entity `id` below the parent named by `request`.
    ///
    /// Emits the kind's `create` action (`update` for nodes), inherits every
    /// heritable property and check of the parent and, for repositories,
    /// attaches the fault sentinel. On failure the entity stays floating and
    /// the error is also written to the error sink.
    pub fn attach(&mut self, id: EntityId, request: &AttachRequest) -> Result<()> {
        self.try_attach(id, request).map_err(|error| {
            self.sinks.report("attach", error.clone());
            error
        })
    }

    fn try_attach(&mut self, id: EntityId, request: &AttachRequest) -> Result<()> {
        let (kind, state, repository_id) = {
            let entity = self.arena.read(id)?;
            if entity.kind == EntityKind::Fault {
                return Err(TreeError::FaultTarget(id));
            }
            if entity.parent.is_some() {
                return Err(TreeError::AlreadyAttached {
                    id,
                    kind: entity.kind,
                });
            }
            (entity.kind, entity.state, entity.repository_id)
        };
        if kind == EntityKind::Root {
            return Err(TreeError::Unsupported {
                operation: "attach",
                kind,
            });
        }
        if state != EntityState::Floating {
            return Err(TreeError::AlreadyAttached { id, kind });
        }
        let parent_kind = self.resolve_parent(request)?;
        check_legal(kind, parent_kind)?;
        if kind == EntityKind::Bucket && repository_id != request.parent_id {
            return Err(TreeError::RepositoryMismatch {
                id,
                parent: request.parent_id,
            });
        }

        self.receive(request.parent_id, id)?;
        let action = if kind == EntityKind::Node {
            ActionKind::Update
        } else {
            ActionKind::Create
        };
        self.emit_entity(action, id)?;
        self.sync_property(request.parent_id, id)?;
        self.sync_check(request.parent_id, id)?;
        if kind == EntityKind::Repository {
            self.attach_fault(id)?;
        }

        info!(entity_id = %id, %kind, parent_id = %request.parent_id, "attached");
        Ok(())
    }

    /// Check that the requested parent exists, has the requested kind and
    /// name, and is itself part of the tree.
    fn resolve_parent(&self, request: &AttachRequest) -> Result<EntityKind> {
        let parent = self.arena.read(request.parent_id)?;
        if parent.kind != request.parent_type {
            return Err(TreeError::WrongKind {
                id: parent.id,
                expected: request.parent_type,
                actual: parent.kind,
            });
        }
        if !request.parent_name.is_empty() && parent.name != request.parent_name {
            return Err(TreeError::NotFound(format!(
                "{} {} named {}",
                parent.kind, parent.id, request.parent_name
            )));
        }
        if !parent.is_attached() {
            return Err(TreeError::NotAttached {
                id: parent.id,
                kind: parent.kind,
            });
        }
        Ok(parent.kind)
    }

    // -----------------------------------------------------------------------
    // Re-attach / detach
    // -----------------------------------------------------------------------

    /// Move an attached group, cluster or node below another parent of the
    /// same bucket.
    ///
    /// Properties and checks inherited from outside the moved sub-tree are
    /// dropped together with their check instances, then everything heritable
    /// is re-inherited from the new parent. Emits `update`.
    pub fn reattach(&mut self, id: EntityId, request: &AttachRequest) -> Result<()> {
        self.try_reattach(id, request)
            .map_err(|error| self.fail("reattach", error))
    }

    fn try_reattach(&mut self, id: EntityId, request: &AttachRequest) -> Result<()> {
        let kind = self.mutable_kind(id)?;
        if !matches!(
            kind,
            EntityKind::Group | EntityKind::Cluster | EntityKind::Node
        ) {
            return Err(TreeError::Unsupported {
                operation: "reattach",
                kind,
            });
        }
        let bucket_id = {
            let entity = self.arena.read(id)?;
            if entity.parent.is_none() {
                return Err(TreeError::NotAttached { id, kind });
            }
            entity.bucket_id
        };
        let parent_kind = self.resolve_parent(request)?;
        check_legal(kind, parent_kind)?;
        let parent_bucket = {
            let parent = self.arena.read(request.parent_id)?;
            parent.bucket_id
        };
        let members = self.subtree(id)?;
        if parent_bucket != bucket_id || members.contains(&request.parent_id) {
            return Err(TreeError::RepositoryMismatch {
                id,
                parent: request.parent_id,
            });
        }

        self.prune_inherited(&members)?;
        self.unlink(id)?;
        self.receive(request.parent_id, id)?;
        self.emit_entity(ActionKind::Update, id)?;
        self.sync_property(request.parent_id, id)?;
        self.sync_check(request.parent_id, id)?;

        info!(entity_id = %id, %kind, parent_id = %request.parent_id, "reattached");
        Ok(())
    }

    /// Move a cluster or node directly below its bucket.
    pub fn detach(&mut self, id: EntityId) -> Result<()> {
        self.try_detach(id).map_err(|error| self.fail("detach", error))
    }

    fn try_detach(&mut self, id: EntityId) -> Result<()> {
        let kind = self.mutable_kind(id)?;
        if !matches!(kind, EntityKind::Cluster | EntityKind::Node) {
            return Err(TreeError::Unsupported {
                operation: "detach",
                kind,
            });
        }
        let (parent, bucket_id) = {
            let entity = self.arena.read(id)?;
            let parent = entity.parent.ok_or(TreeError::NotAttached { id, kind })?;
            (parent, entity.bucket_id)
        };
        if bucket_id.is_nil() {
            return Err(TreeError::NoBucket { id, kind });
        }
        if parent.id == bucket_id {
            debug!(entity_id = %id, "already below its bucket");
            return Ok(());
        }
        let bucket_name = self.arena.read(bucket_id)?.name.clone();
        self.try_reattach(
            id,
            &AttachRequest::new(EntityKind::Bucket, bucket_id, bucket_name),
        )
    }

    /// Drop properties and checks inherited from outside `members`, and the
    /// check instances depending on them.
    fn prune_inherited(&mut self, members: &[EntityId]) -> Result<()> {
        let inside: HashSet<EntityId> = members.iter().copied().collect();
        for id in members {
            let (properties, checks) = {
                let entity = self.arena.read(*id)?;
                let properties: Vec<_> = entity
                    .properties
                    .sorted()
                    .into_iter()
                    .filter(|p| p.inherited && !inside.contains(&p.inherited_from))
                    .map(|p| p.instance_id)
                    .collect();
                let checks: Vec<CheckId> = entity
                    .checks
                    .sorted()
                    .into_iter()
                    .filter(|c| c.inherited && !inside.contains(&c.inherited_from))
                    .map(|c| c.id)
                    .collect();
                (properties, checks)
            };
            for property in properties {
                self.drop_property(*id, property)?;
            }
            for check in checks {
                self.drop_instances(*id, check)?;
                self.drop_check(*id, check)?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Receive / unlink
    // -----------------------------------------------------------------------

    /// Link `child` below `parent`: back-link, state, containment ids,
    /// ordered index, children map, member event.
    pub(crate) fn receive(&mut self, parent_id: EntityId, child_id: EntityId) -> Result<()> {
        let (parent_kind, repository_id, bucket_id, environment) = {
            let parent = self.arena.read(parent_id)?;
            (
                parent.kind,
                parent.repository_id,
                parent.bucket_id,
                parent.environment.clone(),
            )
        };
        let (child_kind, member) = {
            let child = self.arena.get_mut(child_id)?;
            child.parent = Some(ParentRef {
                kind: parent_kind,
                id: parent_id,
            });
            child.state = EntityState::after_attach(child.kind, parent_kind);
            if !matches!(child.kind, EntityKind::Repository | EntityKind::Bucket) {
                child.repository_id = repository_id;
                child.bucket_id = bucket_id;
                child.environment = environment;
            }
            (child.kind, child.object_ref())
        };
        let parent_record = {
            let parent = self.arena.get_mut(parent_id)?;
            parent.children.insert(child_id, child_kind);
            parent.ordered.push(child_kind, child_id);
            parent.record()
        };
        debug!(entity_id = %child_id, kind = %child_kind, parent_id = %parent_id, "received");

        match (parent_kind, child_kind) {
            (EntityKind::Group | EntityKind::Cluster, _) => self.emit(
                Action::new(ActionKind::MemberNew, parent_kind, parent_record).with_member(member),
            ),
            (EntityKind::Bucket, EntityKind::Node) => self.emit(
                Action::new(ActionKind::NodeAssignment, parent_kind, parent_record)
                    .with_member(member),
            ),
            _ => {}
        }
        Ok(())
    }

    /// Reverse of [`receive`](Self::receive). The child keeps its
    /// containment ids and becomes floating.
    pub(crate) fn unlink(&mut self, child_id: EntityId) -> Result<ParentRef> {
        let (link, child_kind, member) = {
            let child = self.arena.get_mut(child_id)?;
            let link = child.parent.take().ok_or(TreeError::NotAttached {
                id: child_id,
                kind: child.kind,
            })?;
            child.state = EntityState::Floating;
            (link, child.kind, child.object_ref())
        };
        let parent_record = {
            let parent = self.arena.get_mut(link.id)?;
            parent.children.remove(&child_id);
            parent.ordered.remove(child_kind, child_id);
            parent.record()
        };
        debug!(entity_id = %child_id, kind = %child_kind, parent_id = %link.id, "unlinked");

        if matches!(link.kind, EntityKind::Group | EntityKind::Cluster) {
            self.emit(
                Action::new(ActionKind::MemberRemoved, link.kind, parent_record)
                    .with_member(member),
            );
        }
        Ok(link)
    }

    // -----------------------------------------------------------------------
    // Destroy
    // -----------------------------------------------------------------------

    /// Destroy an attached entity and its whole sub-tree, leaves first.
    ///
    /// Every entity emits deletes for its check instances, checks and
    /// properties, is unlinked from its parent and emits `delete`.
    pub fn destroy(&mut self, id: EntityId) -> Result<()> {
        self.try_destroy(id).map_err(|error| self.fail("destroy", error))
    }

    fn try_destroy(&mut self, id: EntityId) -> Result<()> {
        let kind = self.mutable_kind(id)?;
        if kind == EntityKind::Root {
            return Err(TreeError::Unsupported {
                operation: "destroy",
                kind,
            });
        }
        if self.arena.read(id)?.parent.is_none() {
            return Err(TreeError::NotAttached { id, kind });
        }
        self.destroy_subtree(id)?;
        info!(entity_id = %id, %kind, "destroyed");
        Ok(())
    }

    fn destroy_subtree(&mut self, id: EntityId) -> Result<()> {
        let children = self.arena.read(id)?.child_ids();
        for child in children {
            self.destroy_subtree(child)?;
        }

        let (kind, instance_checks, checks, properties) = {
            let entity = self.arena.read(id)?;
            let mut instance_checks: Vec<CheckId> =
                entity.checks.check_instances.keys().copied().collect();
            instance_checks.sort();
            let checks: Vec<CheckId> = entity.checks.sorted().iter().map(|c| c.id).collect();
            let properties: Vec<_> = entity
                .properties
                .sorted()
                .iter()
                .map(|p| p.instance_id)
                .collect();
            (entity.kind, instance_checks, checks, properties)
        };
        for check in instance_checks {
            self.drop_instances(id, check)?;
        }
        for check in checks {
            self.drop_check(id, check)?;
        }
        for property in properties {
            self.drop_property(id, property)?;
        }

        self.unlink(id)?;
        {
            let entity = self.arena.get_mut(id)?;
            entity.checks.loaded.clear();
            if kind == EntityKind::Node {
                entity.state = EntityState::Unassigned;
            }
        }
        self.emit_entity(ActionKind::Delete, id)?;
        if kind == EntityKind::Repository {
            self.detach_fault(id)?;
        }
        self.arena.remove(id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Rename / repossess
    // -----------------------------------------------------------------------

    /// Rename an entity. Emits `rename`.
    pub fn set_name(&mut self, id: EntityId, name: &str) -> Result<()> {
        self.try_set_name(id, name)
            .map_err(|error| self.fail("rename", error))
    }

    fn try_set_name(&mut self, id: EntityId, name: &str) -> Result<()> {
        let kind = self.mutable_kind(id)?;
        if name.trim().is_empty() {
            return Err(SpecError::Empty {
                kind: kind.as_str(),
                field: "name",
            }
            .into());
        }
        self.arena.get_mut(id)?.name = name.to_string();
        self.emit_entity(ActionKind::Rename, id)?;
        debug!(entity_id = %id, name, "renamed");
        Ok(())
    }

    /// Hand `id` and its sub-tree to `team`, leaves first. Every entity emits
    /// `repossess` exactly once; fault sentinels are skipped.
    pub fn repossess(&mut self, id: EntityId, team: TeamId) -> Result<()> {
        self.try_repossess(id, team)
            .map_err(|error| self.fail("repossess", error))
    }

    fn try_repossess(&mut self, id: EntityId, team: TeamId) -> Result<()> {
        let kind = self.mutable_kind(id)?;
        if kind == EntityKind::Root {
            return Err(TreeError::Unsupported {
                operation: "repossess",
                kind,
            });
        }
        for entity in self.post_order(id)? {
            self.set_team(entity, team)?;
        }
        info!(entity_id = %id, team_id = %team, "repossessed");
        Ok(())
    }

    /// Post-order ids of the sub-tree rooted at `id`, children in attach
    /// order.
    fn post_order(&self, id: EntityId) -> Result<Vec<EntityId>> {
        fn walk(tree: &Tree, id: EntityId, out: &mut Vec<EntityId>) -> Result<()> {
            for child in tree.arena.read(id)?.child_ids() {
                walk(tree, child, out)?;
            }
            out.push(id);
            Ok(())
        }
        let mut out = Vec::new();
        walk(self, id, &mut out)?;
        Ok(out)
    }

    /// Set the team of a single entity. Emits `repossess`.
    pub(crate) fn set_team(&mut self, id: EntityId, team: TeamId) -> Result<()> {
        self.arena.get_mut(id)?.team_id = team;
        self.emit_entity(ActionKind::Repossess, id)
    }
}
