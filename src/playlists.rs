//! The playlists module manages the playlist hierarchy: a forest of leaf playlists and directories
//! stored flatly in an [`EntityStore`], plus an [`EdgeMap`] recording which directory holds which
//! node. Every operation validates against a working copy of the affected nodes and edges, then
//! commits them in one batch so each call yields a single before/after event.
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, error, info};

use crate::audio_items::AudioItem;
use crate::common::uniq;
use crate::error::{MediaError, MediaExpectedError, Result};
use crate::events::{ChangeEvent, EventKind, SubscriptionId};
use crate::store::{Entity, EntityStore, Upsert, UpsertSummary};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    pub id: u64,
    pub name: String,
    pub is_directory: bool,
    pub audio_item_ids: Vec<u64>,
    pub child_ids: BTreeSet<u64>,
}

impl Playlist {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_directory: false,
            audio_item_ids: Vec::new(),
            child_ids: BTreeSet::new(),
        }
    }

    pub fn directory(id: u64, name: impl Into<String>) -> Self {
        Self {
            is_directory: true,
            ..Self::new(id, name)
        }
    }

    pub fn with_audio_items(mut self, ids: Vec<u64>) -> Self {
        self.audio_item_ids = uniq(ids);
        self
    }
}

impl Entity for Playlist {
    fn id(&self) -> u64 {
        self.id
    }

    fn unique_id(&self) -> String {
        format!("{}:{}:{}", self.id, if self.is_directory { "d" } else { "p" }, self.name)
    }
}

/// Recovers the numeric id from a playlist unique id.
pub fn playlist_id(unique_id: &str) -> Option<u64> {
    unique_id.split_once(':')?.0.parse().ok()
}

/// A detached playlist together with its nested descendants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistTree {
    pub playlist: Playlist,
    pub children: Vec<PlaylistTree>,
}

impl PlaylistTree {
    pub fn leaf(playlist: Playlist) -> Self {
        Self {
            playlist,
            children: Vec::new(),
        }
    }

    pub fn node(playlist: Playlist, children: Vec<PlaylistTree>) -> Self {
        Self { playlist, children }
    }

    /// Every node, parents before children, paired with its parent's id.
    fn flatten(&self) -> Vec<(Option<u64>, &Playlist)> {
        let mut out = Vec::new();
        let mut stack = vec![(None, self)];
        while let Some((parent, tree)) = stack.pop() {
            out.push((parent, &tree.playlist));
            for child in tree.children.iter().rev() {
                stack.push((Some(tree.playlist.id), child));
            }
        }
        out
    }

    /// Number of nodes in the tree.
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(PlaylistTree::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

fn tree_ids(tree: &PlaylistTree, nodes: &[(Option<u64>, &Playlist)]) -> Result<HashSet<u64>> {
    let ids: HashSet<u64> = nodes.iter().map(|(_, p)| p.id).collect();
    if ids.len() != nodes.len() {
        return Err(MediaExpectedError::Generic(format!(
            "Playlist tree {} lists the same playlist twice",
            tree.playlist.name
        ))
        .into());
    }
    Ok(ids)
}

/// Parent to children edges between playlists, keyed by unique id. A child has at most one parent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeMap {
    children: BTreeMap<String, BTreeSet<String>>,
    parents: HashMap<String, String>,
}

impl EdgeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs an edge, detaching `child` from any previous parent. Returns that previous parent.
    pub fn link(&mut self, parent: &str, child: &str) -> Option<String> {
        let previous = self.unlink(child);
        self.children
            .entry(parent.to_string())
            .or_default()
            .insert(child.to_string());
        self.parents.insert(child.to_string(), parent.to_string());
        previous
    }

    /// Removes the parent edge of `child`, returning the parent.
    pub fn unlink(&mut self, child: &str) -> Option<String> {
        let parent = self.parents.remove(child)?;
        if let Some(siblings) = self.children.get_mut(&parent) {
            siblings.remove(child);
            if siblings.is_empty() {
                self.children.remove(&parent);
            }
        }
        Some(parent)
    }

    /// Drops every edge touching `node`.
    pub fn forget(&mut self, node: &str) {
        self.unlink(node);
        if let Some(children) = self.children.remove(node) {
            for child in children {
                self.parents.remove(&child);
            }
        }
    }

    /// Renames a node, keeping its edges.
    pub fn rekey(&mut self, old: &str, new: &str) {
        if old == new {
            return;
        }
        if let Some(children) = self.children.remove(old) {
            for child in &children {
                self.parents.insert(child.clone(), new.to_string());
            }
            self.children.insert(new.to_string(), children);
        }
        if let Some(parent) = self.parents.remove(old) {
            if let Some(siblings) = self.children.get_mut(&parent) {
                siblings.remove(old);
                siblings.insert(new.to_string());
            }
            self.parents.insert(new.to_string(), parent);
        }
    }

    pub fn parent_of(&self, child: &str) -> Option<&str> {
        self.parents.get(child).map(String::as_str)
    }

    pub fn children_of(&self, parent: &str) -> Vec<String> {
        self.children
            .get(parent)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_parent(&self, child: &str) -> bool {
        self.parents.contains_key(child)
    }

    /// Every `(parent, child)` edge.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.children
            .iter()
            .flat_map(|(p, cs)| cs.iter().map(move |c| (p.as_str(), c.as_str())))
    }

    /// Number of edges.
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    fn from_playlists(playlists: &[Playlist]) -> Self {
        let by_id: HashMap<u64, &Playlist> = playlists.iter().map(|p| (p.id, p)).collect();
        let mut edges = EdgeMap::new();
        for parent in playlists {
            for child_id in &parent.child_ids {
                if let Some(child) = by_id.get(child_id) {
                    edges.link(&parent.unique_id(), &child.unique_id());
                }
            }
        }
        edges
    }
}

/// A working copy of the nodes and edges touched by one hierarchy operation.
struct Draft<'a> {
    store: &'a EntityStore<Playlist>,
    edges: EdgeMap,
    changed: BTreeMap<u64, Playlist>,
    removed: BTreeSet<u64>,
}

impl<'a> Draft<'a> {
    fn new(store: &'a EntityStore<Playlist>, edges: &EdgeMap) -> Self {
        Self {
            store,
            edges: edges.clone(),
            changed: BTreeMap::new(),
            removed: BTreeSet::new(),
        }
    }

    fn get(&self, id: u64) -> Option<Playlist> {
        if self.removed.contains(&id) {
            return None;
        }
        self.changed.get(&id).cloned().or_else(|| self.store.get(id))
    }

    fn node(&self, id: u64) -> Result<Playlist> {
        self.get(id)
            .ok_or_else(|| MediaExpectedError::PlaylistIdDoesNotExist { id }.into())
    }

    fn put(&mut self, playlist: Playlist) {
        self.removed.remove(&playlist.id);
        self.changed.insert(playlist.id, playlist);
    }

    fn parent_of(&self, id: u64) -> Option<u64> {
        let node = self.get(id)?;
        self.edges.parent_of(&node.unique_id()).and_then(playlist_id)
    }

    fn ancestors(&self, id: u64) -> Vec<u64> {
        let mut out = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut current = id;
        while let Some(parent) = self.parent_of(current) {
            if !seen.insert(parent) {
                break;
            }
            out.push(parent);
            current = parent;
        }
        out
    }

    /// Every descendant of `id`, parents before children.
    fn descendants(&self, id: u64) -> Vec<u64> {
        let mut out = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut stack: Vec<u64> = self
            .get(id)
            .map(|n| n.child_ids.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            out.push(next);
            if let Some(node) = self.get(next) {
                stack.extend(node.child_ids.iter().rev().copied());
            }
        }
        out
    }

    fn name_taken(&self, name: &str, except: Option<u64>) -> bool {
        let other = |p: &Playlist| p.name == name && Some(p.id) != except;
        self.changed.values().any(|p| other(p))
            || self
                .store
                .get_matching(|p| {
                    other(p) && !self.removed.contains(&p.id) && !self.changed.contains_key(&p.id)
                })
                .is_some()
    }

    fn ensure_name_free(&self, name: &str, except: Option<u64>) -> Result<()> {
        if self.name_taken(name, except) {
            return Err(MediaExpectedError::PlaylistAlreadyExists { name: name.to_string() }.into());
        }
        Ok(())
    }

    /// Removes the parent edge of `id`, if any. Returns the former parent's id.
    fn detach(&mut self, id: u64) -> Result<Option<u64>> {
        let node = self.node(id)?;
        let Some(parent_uid) = self.edges.unlink(&node.unique_id()) else {
            return Ok(None);
        };
        let parent_id = playlist_id(&parent_uid);
        if let Some(mut parent) = parent_id.and_then(|pid| self.get(pid)) {
            parent.child_ids.remove(&id);
            self.put(parent);
        }
        Ok(parent_id)
    }

    /// Installs `child_id` under `parent_id`, detaching it from its current parent first.
    fn attach(&mut self, parent_id: u64, child_id: u64) -> Result<()> {
        let parent = self.node(parent_id)?;
        let child = self.node(child_id)?;
        if !parent.is_directory {
            return Err(MediaExpectedError::NotADirectory { name: parent.name }.into());
        }
        if parent_id == child_id || self.ancestors(parent_id).contains(&child_id) {
            return Err(MediaExpectedError::CyclicHierarchy {
                name: child.name,
                destination: parent.name,
            }
            .into());
        }
        if self.parent_of(child_id) == Some(parent_id) && parent.child_ids.contains(&child_id) {
            debug!("no-op: playlist {} is already in directory {}", child.name, parent.name);
            return Ok(());
        }
        self.detach(child_id)?;
        let mut parent = self.node(parent_id)?;
        parent.child_ids.insert(child_id);
        self.edges.link(&parent.unique_id(), &child.unique_id());
        self.put(parent);
        Ok(())
    }

    /// Removes `id` and every descendant. Returns the removed ids, the node itself last.
    fn remove_subtree(&mut self, id: u64) -> Result<Vec<u64>> {
        self.detach(id)?;
        let mut gone = self.descendants(id);
        gone.push(id);
        for removed in &gone {
            if let Some(node) = self.get(*removed) {
                self.edges.forget(&node.unique_id());
            }
        }
        for removed in &gone {
            self.changed.remove(removed);
            self.removed.insert(*removed);
        }
        Ok(gone)
    }

    /// Changes the name or directory flag of a node, keeping its edges.
    fn rekey(&mut self, old: &Playlist, new: Playlist) {
        self.edges.rekey(&old.unique_id(), &new.unique_id());
        self.put(new);
    }

    /// Writes the working copy to the store in one batch: new nodes as a CREATE, changed and
    /// removed nodes together as one UPDATE (or a DELETE when nothing else changed).
    fn commit(self, edges: &mut EdgeMap) -> Result<UpsertSummary> {
        let Draft {
            store,
            edges: new_edges,
            changed,
            removed,
        } = self;
        let removed: Vec<u64> = removed.into_iter().collect();
        let summary = store.apply(changed.into_values().collect(), &removed)?;
        *edges = new_edges;
        Ok(summary)
    }
}

pub struct PlaylistHierarchy {
    playlists: Arc<EntityStore<Playlist>>,
    audio_items: Arc<EntityStore<AudioItem>>,
    edges: Mutex<EdgeMap>,
}

impl std::fmt::Debug for PlaylistHierarchy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaylistHierarchy")
            .field("playlists", &self.playlists.len())
            .field("edges", &self.lock().len())
            .finish()
    }
}

impl PlaylistHierarchy {
    /// Wraps a playlist store. Edges are derived from the child ids already stored.
    pub fn new(playlists: Arc<EntityStore<Playlist>>, audio_items: Arc<EntityStore<AudioItem>>) -> Self {
        let edges = EdgeMap::from_playlists(&playlists.entities());
        Self {
            playlists,
            audio_items,
            edges: Mutex::new(edges),
        }
    }

    pub fn store(&self) -> &Arc<EntityStore<Playlist>> {
        &self.playlists
    }

    fn lock(&self) -> MutexGuard<'_, EdgeMap> {
        self.edges.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_audio_items(&self, ids: &[u64]) -> Result<()> {
        match ids.iter().find(|id| !self.audio_items.contains(**id)) {
            Some(id) => Err(MediaExpectedError::AudioItemDoesNotExist { id: *id }.into()),
            None => Ok(()),
        }
    }

    pub fn create_playlist(&self, name: &str, audio_item_ids: &[u64]) -> Result<Playlist> {
        let mut edges = self.lock();
        let mut draft = Draft::new(&self.playlists, &edges);
        draft.ensure_name_free(name, None)?;
        self.check_audio_items(audio_item_ids)?;
        let playlist = Playlist::new(self.playlists.next_id(), name).with_audio_items(audio_item_ids.to_vec());
        draft.put(playlist.clone());
        draft.commit(&mut edges)?;
        info!("created playlist {}", name);
        Ok(playlist)
    }

    /// Creates a directory and moves the given playlists into it.
    pub fn create_playlist_directory(&self, name: &str, child_playlist_ids: &[u64]) -> Result<Playlist> {
        let mut edges = self.lock();
        let mut draft = Draft::new(&self.playlists, &edges);
        draft.ensure_name_free(name, None)?;
        let directory = Playlist::directory(self.playlists.next_id(), name);
        draft.put(directory.clone());
        for child in child_playlist_ids {
            draft.attach(directory.id, *child)?;
        }
        let directory = draft.node(directory.id)?;
        draft.commit(&mut edges)?;
        info!("created playlist directory {} holding {} playlists", name, directory.child_ids.len());
        Ok(directory)
    }

    /// Registers a detached tree as a new root. Returns false, changing nothing, if any of its ids
    /// is already stored.
    pub fn add(&self, tree: PlaylistTree) -> Result<bool> {
        let mut edges = self.lock();
        let nodes = tree.flatten();
        if let Some((_, taken)) = nodes.iter().find(|(_, p)| self.playlists.contains(p.id)) {
            debug!("no-op: playlist id {} is already stored", taken.id);
            return Ok(false);
        }
        let mut draft = Draft::new(&self.playlists, &edges);
        self.stage_tree(&mut draft, &tree, &nodes)?;
        draft.commit(&mut edges)?;
        info!("added playlist tree {} with {} nodes", tree.playlist.name, nodes.len());
        Ok(true)
    }

    /// Adds a tree, or replaces the stored subtree rooted at the tree's root id. A stored root keeps
    /// its position in the hierarchy; a new root becomes a top-level node. Stored descendants that
    /// the new tree no longer contains are removed, and stored nodes the tree pulls in from
    /// elsewhere are moved.
    pub fn add_or_replace(&self, tree: PlaylistTree) -> Result<Upsert> {
        let mut edges = self.lock();
        let mut draft = Draft::new(&self.playlists, &edges);
        let root = tree.playlist.id;
        let nodes = tree.flatten();
        let ids = tree_ids(&tree, &nodes)?;
        let is_new = draft.get(root).is_none();
        if let Some(ancestor) = draft.ancestors(root).into_iter().find(|a| ids.contains(a)) {
            return Err(MediaExpectedError::CyclicHierarchy {
                name: draft.node(ancestor)?.name,
                destination: tree.playlist.name.clone(),
            }
            .into());
        }

        for (_, node) in nodes.iter().skip(1) {
            if draft.get(node.id).is_some() {
                draft.detach(node.id)?;
            }
        }
        // Whatever the tree nodes still hold is not part of the new tree.
        for (_, node) in &nodes {
            let leftovers: Vec<u64> = draft
                .get(node.id)
                .map(|n| n.child_ids.iter().copied().collect())
                .unwrap_or_default();
            for child in leftovers {
                draft.remove_subtree(child)?;
            }
        }
        self.stage_tree(&mut draft, &tree, &nodes)?;
        let summary = draft.commit(&mut edges)?;
        if is_new {
            info!("added playlist tree {} with {} nodes", tree.playlist.name, nodes.len());
            return Ok(Upsert::Created);
        }
        if !summary.changed() {
            debug!("no-op: playlist tree {} is unchanged", tree.playlist.name);
            return Ok(Upsert::Unchanged);
        }
        info!("replaced playlist tree {}", tree.playlist.name);
        Ok(Upsert::Replaced)
    }

    /// Validates a flattened tree and writes its nodes and edges into the draft. The child ids of a
    /// node come from the tree, not from its value.
    fn stage_tree(&self, draft: &mut Draft<'_>, tree: &PlaylistTree, nodes: &[(Option<u64>, &Playlist)]) -> Result<()> {
        let ids = tree_ids(tree, nodes)?;
        let mut names = HashSet::new();
        for (_, node) in nodes {
            let clash = !names.insert(node.name.as_str())
                || draft
                    .store
                    .get_matching(|p| p.name == node.name && !ids.contains(&p.id) && !draft.removed.contains(&p.id))
                    .is_some();
            if clash {
                return Err(MediaExpectedError::PlaylistAlreadyExists { name: node.name.clone() }.into());
            }
            self.check_audio_items(&node.audio_item_ids)?;
        }
        for (_, node) in nodes {
            let mut value = (*node).clone();
            value.child_ids.clear();
            value.audio_item_ids = uniq(value.audio_item_ids);
            match draft.get(value.id) {
                Some(old) => draft.rekey(&old, value),
                None => draft.put(value),
            }
        }
        for (parent, node) in nodes {
            if let Some(parent) = parent {
                draft.attach(*parent, node.id)?;
            }
        }
        Ok(())
    }

    /// Removes a playlist and all of its descendants. Returns false if the id is unknown.
    pub fn remove(&self, id: u64) -> Result<bool> {
        self.remove_all(&[id])
    }

    pub fn remove_all(&self, ids: &[u64]) -> Result<bool> {
        let mut edges = self.lock();
        let mut draft = Draft::new(&self.playlists, &edges);
        let mut count = 0;
        for id in ids {
            if draft.get(*id).is_none() {
                debug!("no-op: playlist id {} does not exist", id);
                continue;
            }
            count += draft.remove_subtree(*id)?.len();
        }
        if count == 0 {
            return Ok(false);
        }
        draft.commit(&mut edges)?;
        info!("removed {} playlists", count);
        Ok(true)
    }

    /// Moves a playlist under `destination`, or makes it a root when `destination` is None.
    pub fn move_playlist(&self, id: u64, destination: Option<u64>) -> Result<()> {
        let mut edges = self.lock();
        let mut draft = Draft::new(&self.playlists, &edges);
        let node = draft.node(id)?;
        let current = draft.parent_of(id);
        if current == destination {
            debug!("no-op: playlist {} is already in place", node.name);
            return Ok(());
        }
        match destination {
            Some(dest) => draft.attach(dest, id)?,
            None => {
                draft.detach(id)?;
            }
        }
        draft.commit(&mut edges)?;
        match destination {
            Some(dest) => info!("moved playlist {} into directory {}", node.name, dest),
            None => info!("moved playlist {} to the top level", node.name),
        }
        Ok(())
    }

    pub fn add_playlists_to_directory(&self, directory: u64, playlist_ids: &[u64]) -> Result<()> {
        let mut edges = self.lock();
        let mut draft = Draft::new(&self.playlists, &edges);
        let dir = draft.node(directory)?;
        for id in playlist_ids {
            draft.attach(directory, *id)?;
        }
        if draft.commit(&mut edges)?.changed() {
            info!("added {} playlists to directory {}", playlist_ids.len(), dir.name);
        }
        Ok(())
    }

    /// Removes the given children of a directory from the hierarchy altogether, with their
    /// descendants. Ids that are not children of the directory are skipped.
    pub fn remove_playlists_from_directory(&self, directory: u64, playlist_ids: &[u64]) -> Result<()> {
        let mut edges = self.lock();
        let mut draft = Draft::new(&self.playlists, &edges);
        let dir = draft.node(directory)?;
        if !dir.is_directory {
            return Err(MediaExpectedError::NotADirectory { name: dir.name }.into());
        }
        for id in playlist_ids {
            let child = draft.node(*id)?;
            if !dir.child_ids.contains(id) {
                debug!("no-op: playlist {} is not in directory {}", child.name, dir.name);
                continue;
            }
            draft.remove_subtree(*id)?;
        }
        if draft.commit(&mut edges)?.changed() {
            info!("removed {} playlists from directory {}", playlist_ids.len(), dir.name);
        }
        Ok(())
    }

    /// Appends audio items not yet in the playlist. Returns whether it changed.
    pub fn add_audio_items_to_playlist(&self, id: u64, audio_item_ids: &[u64]) -> Result<bool> {
        let mut edges = self.lock();
        let mut draft = Draft::new(&self.playlists, &edges);
        let mut playlist = draft.node(id)?;
        self.check_audio_items(audio_item_ids)?;
        let before = playlist.audio_item_ids.len();
        for audio_item in audio_item_ids {
            if playlist.audio_item_ids.contains(audio_item) {
                debug!("no-op: audio item {} already in playlist {}", audio_item, playlist.name);
                continue;
            }
            playlist.audio_item_ids.push(*audio_item);
        }
        let added = playlist.audio_item_ids.len() - before;
        if added == 0 {
            return Ok(false);
        }
        let name = playlist.name.clone();
        draft.put(playlist);
        draft.commit(&mut edges)?;
        info!("added {} audio items to playlist {}", added, name);
        Ok(true)
    }

    pub fn remove_audio_items_from_playlist(&self, id: u64, audio_item_ids: &[u64]) -> Result<bool> {
        let mut edges = self.lock();
        let mut draft = Draft::new(&self.playlists, &edges);
        let mut playlist = draft.node(id)?;
        let before = playlist.audio_item_ids.len();
        playlist.audio_item_ids.retain(|a| !audio_item_ids.contains(a));
        let removed = before - playlist.audio_item_ids.len();
        if removed == 0 {
            info!("no-op: none of the audio items are in playlist {}", playlist.name);
            return Ok(false);
        }
        let name = playlist.name.clone();
        draft.put(playlist);
        draft.commit(&mut edges)?;
        info!("removed {} audio items from playlist {}", removed, name);
        Ok(true)
    }

    pub fn rename_playlist(&self, id: u64, new_name: &str) -> Result<()> {
        let mut edges = self.lock();
        let mut draft = Draft::new(&self.playlists, &edges);
        let old = draft.node(id)?;
        if old.name == new_name {
            debug!("no-op: playlist {} already has that name", new_name);
            return Ok(());
        }
        draft.ensure_name_free(new_name, Some(id))?;
        let renamed = Playlist {
            name: new_name.to_string(),
            ..old.clone()
        };
        draft.rekey(&old, renamed);
        draft.commit(&mut edges)?;
        info!("renamed playlist {} to {}", old.name, new_name);
        Ok(())
    }

    /// Flips the directory flag. A directory that still holds playlists cannot become a leaf.
    pub fn set_directory(&self, id: u64, is_directory: bool) -> Result<()> {
        let mut edges = self.lock();
        let mut draft = Draft::new(&self.playlists, &edges);
        let old = draft.node(id)?;
        if old.is_directory == is_directory {
            return Ok(());
        }
        if !is_directory && !old.child_ids.is_empty() {
            return Err(MediaExpectedError::Generic(format!(
                "Playlist directory {} still holds {} playlists",
                old.name,
                old.child_ids.len()
            ))
            .into());
        }
        let flipped = Playlist {
            is_directory,
            ..old.clone()
        };
        draft.rekey(&old, flipped);
        draft.commit(&mut edges)?;
        info!("set directory flag of playlist {} to {}", old.name, is_directory);
        Ok(())
    }

    pub fn find_by_name(&self, name: &str) -> Option<Playlist> {
        self.playlists.search(|p| p.name == name).into_iter().next()
    }

    pub fn playlist_by_name(&self, name: &str) -> Result<Playlist> {
        self.find_by_name(name)
            .ok_or_else(|| MediaExpectedError::PlaylistDoesNotExist { name: name.to_string() }.into())
    }

    pub fn find_by_id(&self, id: u64) -> Option<Playlist> {
        self.playlists.find_by_id(id)
    }

    /// The directory holding `id`, or None for a root.
    pub fn find_parent_playlist(&self, id: u64) -> Result<Option<Playlist>> {
        let edges = self.lock();
        let node = self
            .playlists
            .get(id)
            .ok_or(MediaExpectedError::PlaylistIdDoesNotExist { id })?;
        Ok(edges
            .parent_of(&node.unique_id())
            .and_then(playlist_id)
            .and_then(|pid| self.playlists.get(pid)))
    }

    pub fn children(&self, id: u64) -> Result<Vec<Playlist>> {
        let _edges = self.lock();
        let node = self
            .playlists
            .get(id)
            .ok_or(MediaExpectedError::PlaylistIdDoesNotExist { id })?;
        Ok(node.child_ids.iter().filter_map(|c| self.playlists.get(*c)).collect())
    }

    /// Playlists without a parent, in id order.
    pub fn roots(&self) -> Vec<Playlist> {
        let edges = self.lock();
        self.playlists
            .entities()
            .into_iter()
            .filter(|p| !edges.has_parent(&p.unique_id()))
            .collect()
    }

    /// A detached copy of the subtree rooted at `id`.
    pub fn tree(&self, id: u64) -> Result<PlaylistTree> {
        let _edges = self.lock();
        let root = self
            .playlists
            .get(id)
            .ok_or(MediaExpectedError::PlaylistIdDoesNotExist { id })?;
        self.subtree(root, &mut HashSet::new())
    }

    fn subtree(&self, playlist: Playlist, seen: &mut HashSet<u64>) -> Result<PlaylistTree> {
        if !seen.insert(playlist.id) {
            return Err(MediaError::Consistency(format!(
                "playlist {} is reachable twice in the hierarchy",
                playlist.name
            )));
        }
        let mut children = Vec::new();
        for child_id in &playlist.child_ids {
            let child = self.playlists.get(*child_id).ok_or_else(|| {
                MediaError::Consistency(format!("playlist {} references missing child {}", playlist.name, child_id))
            })?;
            children.push(self.subtree(child, seen)?);
        }
        Ok(PlaylistTree { playlist, children })
    }

    /// The audio items of a playlist, in playlist order.
    pub fn audio_items_of(&self, id: u64) -> Result<Vec<AudioItem>> {
        let playlist = self
            .playlists
            .get(id)
            .ok_or(MediaExpectedError::PlaylistIdDoesNotExist { id })?;
        Ok(playlist
            .audio_item_ids
            .iter()
            .filter_map(|a| self.audio_items.get(*a))
            .collect())
    }

    pub fn edges(&self) -> EdgeMap {
        self.lock().clone()
    }

    /// Drops the given audio items from every playlist. Returns whether any playlist changed.
    pub fn purge_audio_items(&self, audio_item_ids: &[u64]) -> Result<bool> {
        let mut edges = self.lock();
        let mut draft = Draft::new(&self.playlists, &edges);
        let affected = self
            .playlists
            .entities()
            .into_iter()
            .filter(|p| p.audio_item_ids.iter().any(|a| audio_item_ids.contains(a)));
        for mut playlist in affected {
            playlist.audio_item_ids.retain(|a| !audio_item_ids.contains(a));
            draft.put(playlist);
        }
        let commit = draft.commit(&mut edges)?;
        if commit.changed() {
            info!("purged {} audio items from {} playlists", audio_item_ids.len(), commit.replaced);
        }
        Ok(commit.changed())
    }

    /// Removes deleted audio items from every playlist as the audio-item store reports them.
    pub fn attach_audio_items(self: &Arc<Self>) -> Result<SubscriptionId> {
        let hierarchy: Weak<Self> = Arc::downgrade(self);
        self.audio_items.subscribe(move |event: &ChangeEvent<AudioItem>| {
            let deleted = match event.kind {
                EventKind::Delete => &event.entities,
                EventKind::Update => &event.removed_entities,
                _ => return,
            };
            if deleted.is_empty() {
                return;
            }
            let Some(hierarchy) = hierarchy.upgrade() else {
                return;
            };
            let ids: Vec<u64> = deleted.iter().map(|a| a.id).collect();
            if let Err(e) = hierarchy.purge_audio_items(&ids) {
                error!("failed to purge deleted audio items from playlists: {}", e);
            }
        })
    }

    /// Registers already validated nodes, deriving the edges from their child ids.
    pub(crate) fn restore(&self, playlists: Vec<Playlist>) -> Result<()> {
        let mut edges = self.lock();
        self.playlists.add_or_replace_all(playlists)?;
        *edges = EdgeMap::from_playlists(&self.playlists.entities());
        debug!("restored {} playlists with {} edges", self.playlists.len(), edges.len());
        Ok(())
    }

    /// Verifies that the edge map and the stored child ids agree.
    pub fn check_consistency(&self) -> Result<()> {
        let edges = self.lock();
        let playlists = self.playlists.entities();
        let by_id: HashMap<u64, &Playlist> = playlists.iter().map(|p| (p.id, p)).collect();
        let mut parent_count: HashMap<u64, usize> = HashMap::new();
        for parent in &playlists {
            if !parent.is_directory && !parent.child_ids.is_empty() {
                return Err(MediaError::Consistency(format!(
                    "playlist {} holds children but is not a directory",
                    parent.name
                )));
            }
            for child_id in &parent.child_ids {
                let child = by_id.get(child_id).ok_or_else(|| {
                    MediaError::Consistency(format!("playlist {} references missing child {}", parent.name, child_id))
                })?;
                *parent_count.entry(*child_id).or_default() += 1;
                if edges.parent_of(&child.unique_id()) != Some(parent.unique_id().as_str()) {
                    return Err(MediaError::Consistency(format!(
                        "no edge from {} to {}",
                        parent.unique_id(),
                        child.unique_id()
                    )));
                }
            }
        }
        if let Some((id, _)) = parent_count.iter().find(|(_, n)| **n > 1) {
            return Err(MediaError::Consistency(format!("playlist {id} has more than one parent")));
        }
        for (parent_uid, child_uid) in edges.iter() {
            let resolved = |uid: &str| playlist_id(uid).and_then(|id| by_id.get(&id)).filter(|p| p.unique_id() == uid);
            match (resolved(parent_uid), resolved(child_uid)) {
                (Some(parent), Some(child)) if parent.child_ids.contains(&child.id) => {}
                _ => {
                    return Err(MediaError::Consistency(format!(
                        "edge {parent_uid} -> {child_uid} does not match the stored playlists"
                    )))
                }
            }
        }
        Ok(())
    }
}
