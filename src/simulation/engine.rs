// src/simulation/engine.rs

//! Incremental assembly of the global scattering matrix and the amplitude
//! back-solve.
//!
//! The cache has two levels. `csms[i]` holds partial star products anchored
//! at layer `i`: entries `(i, j, S[i..=j])` with `j` strictly increasing
//! within the list. `csmsr` holds output-anchored products `(i, N-1,
//! S[i..=N-1])` with `i` strictly decreasing. Both share their matrices by
//! `Arc`, so a partial product reused by several spans is stored once.
//!
//! After an edit, only products whose span passes through a modified layer
//! are dropped; the rebuild extends the surviving prefixes instead of
//! recomposing the whole stack.

use std::sync::Arc;

use log::{debug, warn};

use crate::core::linalg::{col_mat, first_col, identity, scale, solve_checked};
use crate::core::smatrix::{rsp, rsp_in, rsp_out};
use crate::core::{C64, SMatrix, SimError};
use crate::layer::Region;
use crate::simulation::Inkstone;
use faer::linalg::solvers::Solve;

/// One cached partial product: the scattering matrix of layers
/// `anchor ..= end`.
#[derive(Debug, Clone)]
pub(crate) struct CsmEntry {
    pub anchor: usize,
    pub end: usize,
    pub sm: Arc<SMatrix>,
}

impl CsmEntry {
    fn new(anchor: usize, end: usize, sm: Arc<SMatrix>) -> Self {
        Self { anchor, end, sm }
    }
}

impl Inkstone {
    /// Solves the structure: classifies regions, collects the dirty set,
    /// trims the caches, rebuilds the global scattering matrix and the
    /// outgoing amplitudes. Queries call this lazily; with nothing dirty it
    /// does no linear algebra at all.
    pub fn solve(&mut self) -> Result<(), SimError> {
        if self.layers.len() >= 2 {
            let n_inc = self.half_space_index(0);
            let n_out = self.half_space_index(self.layers.len() - 1);
            if (n_inc, n_out) != (self.pr.n_inc, self.pr.n_out) {
                self.pr.set_media_indices(n_inc, n_out);
                self.mark_all_modified();
            }
        }
        if self.pr.q0_contain_0() || self.layers.len() < 2 {
            return Ok(());
        }
        self.determine_regions();
        self.determine_recalc();
        self.calc_sm()?;
        self.calc_bi_ao();
        Ok(())
    }

    /// Classifies every layer as incident / interior / output. A layer
    /// whose classification changed (a layer was appended behind the old
    /// output layer, say) is invalidated wholesale.
    pub(crate) fn determine_regions(&mut self) {
        let last = self.layers.len() - 1;
        let mut changed = Vec::new();
        for (i, layer) in self.layers.iter_mut().enumerate() {
            let region = match i {
                0 => Region::In,
                _ if i == last => Region::Out,
                _ => Region::Mid,
            };
            if region != Region::Mid && layer.thickness != 0.0 && !layer.warned_end_thickness {
                warn!(
                    "layer \"{}\" is a half-space; its nonzero thickness is ignored (treated as zero)",
                    layer.name
                );
                layer.warned_end_thickness = true;
            }
            if layer.region != region {
                layer.region = region;
                changed.push(i);
            }
        }
        for i in changed {
            self.mark_modified(i);
        }
    }

    /// Collects the dirty layer set and drops every cached product whose
    /// span passes through a dirty layer, in both cache directions.
    pub(crate) fn determine_recalc(&mut self) {
        self.layers_mod = self
            .layers
            .iter()
            .enumerate()
            .filter(|(_, l)| l.if_mod || l.if_t_change)
            .map(|(i, _)| i)
            .collect();

        if let (Some(&first), Some(&last)) = (self.layers_mod.first(), self.layers_mod.last()) {
            self.need_recalc_sm = true;
            for layer in &mut self.layers[first..] {
                layer.csm = None;
            }
            for layer in &mut self.layers[..last] {
                layer.csmr = None;
            }

            // Anchored at or left of a dirty layer k, any span reaching k is
            // stale. Anchors right of every dirty layer keep everything.
            let mut prev = 0usize;
            for &k in &self.layers_mod.clone() {
                for j in prev..=k {
                    if let Some(pos) = self.csms[j].iter().position(|e| e.end >= k) {
                        self.csms[j].truncate(pos);
                    }
                }
                prev = k + 1;
            }
            if let Some(pos) = self.csmsr.iter().position(|e| e.anchor <= last) {
                self.csmsr.truncate(pos);
            }
        }

        if self.need_recalc_sm {
            self.need_recalc_bi_ao = true;
            for layer in &mut self.layers {
                layer.need_recalc_al_bl = true;
            }
        }
    }

    /// Rebuilds the global scattering matrix, extending cached partial
    /// products over the clean spans and re-solving only the dirty layers.
    pub(crate) fn calc_sm(&mut self) -> Result<(), SimError> {
        if !self.need_recalc_sm {
            return Ok(());
        }
        let n = self.layers.len();
        self.ensure_layer_solved(0)?;

        // Sweep the dirty interior/output layers in order. Between two
        // dirty layers, the anchor right after the previous one absorbs the
        // clean span.
        let dirty: Vec<usize> = self.layers_mod.iter().copied().filter(|&k| k > 0).collect();
        let mut prev_dirty = 0usize;
        for &k in &dirty {
            let anchor = prev_dirty + 1;
            if anchor < k {
                self.extend_anchor_to(anchor, k - 1)?;
            }
            self.ensure_layer_solved(k)?;
            let sm = self.layers[k].sm.clone().expect("just solved");
            self.push_csms_entry(CsmEntry::new(k, k, sm));
            prev_dirty = k;
        }

        // Stitch in the incident half-space.
        let layer0_vacuum = self.layer_is_vacuum(0);
        if layer0_vacuum {
            if self.csms[0].is_empty() {
                let sm0 = self.pr.sm0.clone();
                self.push_csms_entry(CsmEntry::new(0, 0, sm0));
            }
            // The vacuum half-space scatters nothing: products anchored at
            // layer 1 are also products anchored at 0.
            let copied: Vec<CsmEntry> = self.csms[1].clone();
            for e in copied {
                if e.end > self.csms[0].last().map_or(0, |l| l.end) {
                    self.layers[e.end].csm = Some(e.sm.clone());
                    self.push_csms_entry(CsmEntry::new(0, e.end, e.sm));
                }
            }
        } else {
            let sm_half = self.layers[0].sm.clone().expect("solved above");
            if self.csms[0].is_empty() {
                self.push_csms_entry(CsmEntry::new(0, 0, sm_half.clone()));
            }
            let child = self.csms[1]
                .last()
                .cloned()
                .ok_or_else(|| coherence("no partial product anchored at layer 1"))?;
            if child.end > self.csms[0].last().map_or(0, |l| l.end) {
                let ss = self.star_in(&sm_half, &child.sm, (0, child.end))?;
                let ss = Arc::new(ss);
                self.layers[child.end].csm = Some(ss.clone());
                self.push_csms_entry(CsmEntry::new(0, child.end, ss));
            }
        }
        self.layers[0].csm = self.layers[0].sm.clone();

        // Stitch in the output half-space.
        let last_vacuum = self.layer_is_vacuum(n - 1);
        if last_vacuum {
            // Trivial extension: the product through N-2 is also the
            // product through N-1.
            for j in 0..n {
                if let Some(e) = self.csms[j].last().cloned() {
                    if e.end == n - 2 {
                        self.push_csms_entry(CsmEntry::new(j, n - 1, e.sm));
                    }
                }
            }
        } else if self.layers_mod.last() == Some(&(n - 1)) {
            let found = self
                .csms
                .iter()
                .find_map(|list| list.last().filter(|e| e.end == n - 2).cloned());
            if let Some(found) = found {
                let out_sm = self.layers[n - 1].sm.clone().expect("solved in the sweep");
                let composed = self.star_out(&found.sm, &out_sm, (found.anchor, n - 1))?;
                self.push_csms_entry(CsmEntry::new(found.anchor, n - 1, Arc::new(composed)));
            } else if self.csms[0].last().map(|e| e.end) != Some(n - 1) {
                // A two-layer stack is fully covered by the incident stitch;
                // anything else missing here is a bookkeeping bug.
                return Err(coherence("no partial product ending at the output interface"));
            }
        } else {
            let from = self.layers_mod.last().map_or(n - 1, |&k| k + 1);
            self.calc_csmr_layer(from)?;
        }

        // Final sweep: fold the anchored lists left to right into the
        // global matrix, recording each boundary's cumulative matrix.
        let mut head = self.csms[0]
            .last()
            .cloned()
            .ok_or_else(|| coherence("empty incident-anchored cache"))?;
        self.layers[head.end].csm = Some(head.sm.clone());
        let mut j = head.end + 1;
        while j < n {
            let child = self.csms[j]
                .last()
                .cloned()
                .ok_or_else(|| coherence("gap in the anchored partial products"))?;
            let composed = Arc::new(self.star(&head.sm, &child.sm, (0, child.end))?);
            self.layers[child.end].csm = Some(composed.clone());
            head = CsmEntry::new(0, child.end, composed);
            self.push_csms_entry(head.clone());
            j = child.end + 1;
        }

        self.sm = Some(head.sm);
        self.need_recalc_sm = false;
        debug!(
            "global scattering matrix rebuilt: {} of {} layers re-solved",
            self.layers_mod.len(),
            n
        );
        Ok(())
    }

    /// Ensures `csms[0]` contains an entry ending at `i`, composing the
    /// right-most cached children. Does no layer solving.
    pub(crate) fn calc_csm_layer(&mut self, i: usize) -> Result<(), SimError> {
        let n = self.layers.len();
        if i == n - 1 {
            warn!(
                "the cumulative matrix of the last layer is the overall scattering matrix and is already available"
            );
            return Ok(());
        }
        let pos = self.csms[0]
            .iter()
            .rposition(|e| e.end <= i)
            .ok_or_else(|| coherence("incident-anchored cache has no usable prefix"))?;
        let found = self.csms[0][pos].clone();
        if found.end >= i {
            self.layers[i].csm = Some(found.sm);
            return Ok(());
        }

        let mut insert_at = pos;
        let mut acc = found.sm;
        let mut ix = found.end + 1;
        let mut first_step_from_half_space = found.end == 0;
        while ix <= i {
            let child = self.csms[ix]
                .iter()
                .rev()
                .find(|e| e.end <= i)
                .cloned()
                .ok_or_else(|| coherence("gap while extending the incident-anchored cache"))?;
            let composed = if first_step_from_half_space {
                self.star_in(&acc, &child.sm, (0, child.end))?
            } else {
                self.star(&acc, &child.sm, (0, child.end))?
            };
            first_step_from_half_space = false;
            acc = Arc::new(composed);
            self.layers[child.end].csm = Some(acc.clone());
            insert_at += 1;
            self.csms[0]
                .insert(insert_at, CsmEntry::new(0, child.end, acc.clone()));
            ix = child.end + 1;
        }
        Ok(())
    }

    /// Ensures `csmsr` covers down to anchor `i`, composing right to left.
    /// Seeds the reversed cache from the output half-space on first use.
    pub(crate) fn calc_csmr_layer(&mut self, i: usize) -> Result<(), SimError> {
        let n = self.layers.len();
        if i >= n {
            return Ok(());
        }

        if self.csmsr.is_empty() {
            let seed = self.csms[n - 1]
                .first()
                .cloned()
                .ok_or_else(|| coherence("output layer has no cached scattering matrix"))?;
            self.layers[n - 1].csmr = Some(seed.sm.clone());
            self.csmsr.push(seed);
            if self.layer_is_vacuum(n - 1) {
                // The product [N-2 ..= N-1] is just layer N-2's own matrix.
                let e = self.csms[n - 2]
                    .first()
                    .cloned()
                    .ok_or_else(|| coherence("no per-layer matrix next to the output"))?;
                let entry = CsmEntry::new(n - 2, n - 1, e.sm.clone());
                self.layers[n - 2].csmr = Some(e.sm);
                if self.csms[n - 2].last().map(|l| l.end) == Some(n - 2) {
                    self.push_csms_entry(entry.clone());
                }
                self.csmsr.push(entry);
            }
        }

        let pos = self
            .csmsr
            .iter()
            .rposition(|e| e.anchor >= i)
            .ok_or_else(|| coherence("output-anchored cache has no usable suffix"))?;
        let found = self.csmsr[pos].clone();
        if found.anchor <= i {
            self.layers[i].csmr = Some(found.sm);
            return Ok(());
        }

        // Children covering [i .. found.anchor-1], left to right, each the
        // largest cached span ending before the current right edge.
        let mut children = Vec::new();
        let mut j = i;
        while j < found.anchor {
            let child = self.csms[j]
                .iter()
                .rev()
                .find(|e| e.end < found.anchor)
                .cloned()
                .ok_or_else(|| coherence("gap while extending the output-anchored cache"))?;
            j = child.end + 1;
            children.push(child);
        }

        let mut insert_at = pos;
        let mut acc = found.sm;
        if found.anchor == n - 1 {
            let child = children.pop().expect("found.anchor > i implies a child");
            let composed = Arc::new(self.star_out(&child.sm, &acc, (child.anchor, n - 1))?);
            acc = composed;
            self.layers[child.anchor].csmr = Some(acc.clone());
            self.push_csms_entry(CsmEntry::new(child.anchor, n - 1, acc.clone()));
            insert_at += 1;
            self.csmsr
                .insert(insert_at, CsmEntry::new(child.anchor, n - 1, acc.clone()));
        }
        for child in children.into_iter().rev() {
            let composed = Arc::new(self.star(&child.sm, &acc, (child.anchor, n - 1))?);
            acc = composed;
            self.layers[child.anchor].csmr = Some(acc.clone());
            self.push_csms_entry(CsmEntry::new(child.anchor, n - 1, acc.clone()));
            insert_at += 1;
            self.csmsr
                .insert(insert_at, CsmEntry::new(child.anchor, n - 1, acc.clone()));
        }
        Ok(())
    }

    /// Computes the forward/backward modal amplitudes inside layer `i` from
    /// the four cumulative matrices around it, averaging the two
    /// Redheffer-based estimates for stability.
    pub(crate) fn calc_al_bl_layer(&mut self, i: usize) -> Result<(), SimError> {
        if !self.layers[i].need_recalc_al_bl {
            return Ok(());
        }
        let g2 = 2 * self.pr.num_g();

        let (al, bl) = match self.layers[i].region {
            Region::In => (
                self.pr.ai.clone(),
                self.bi.clone().unwrap_or_else(|| vec![C64::new(0.0, 0.0); g2]),
            ),
            Region::Out => (
                self.ao.clone().unwrap_or_else(|| vec![C64::new(0.0, 0.0); g2]),
                self.pr.bo.clone(),
            ),
            Region::Mid => {
                self.calc_csmr_layer(i)?;
                self.calc_csmr_layer(i + 1)?;
                self.calc_csm_layer(i)?;
                self.calc_csm_layer(i - 1)?;

                let csm = self.layers[i].csm.clone().ok_or_else(|| {
                    coherence("interior layer lost its cumulative matrix")
                })?;
                let csmp = self.layers[i - 1].csm.clone().ok_or_else(|| {
                    coherence("previous layer lost its cumulative matrix")
                })?;
                let csmr = self.layers[i].csmr.clone().ok_or_else(|| {
                    coherence("interior layer lost its reversed cumulative matrix")
                })?;
                let csmrn = self.layers[i + 1].csmr.clone().ok_or_else(|| {
                    coherence("next layer lost its reversed cumulative matrix")
                })?;
                let basis = self.layers[i].basis.clone().ok_or_else(|| {
                    coherence("interior layer has no modal basis")
                })?;

                let ai_v = col_mat(&self.pr.ai);
                let bo_v = col_mat(&self.pr.bo);
                let eye = identity(g2);
                let singular = |_| SimError::NumericalSingularity { span: (i, i) };

                // Amplitudes at the left interface of layer i.
                let prev_vacuum = self.layer_is_vacuum(i - 1);
                let prev = &self.layers[i - 1];
                let sa = if prev.region == Region::In && !prev_vacuum {
                    // The incident transmission block is the inverse of the
                    // cached interface factorization; reuse it.
                    let basis = prev
                        .basis
                        .as_ref()
                        .ok_or_else(|| coherence("incident interface factorization missing"))?;
                    basis.half_lu.solve(&ai_v)
                } else {
                    &csmp.s21 * &ai_v
                };
                let sb = &csmr.s12 * &bo_v;
                let g1 = solve_checked(
                    &(&eye - &(&csmr.s11 * &csmp.s22)),
                    &(&(&csmr.s11 * &sa) + &sb),
                )
                .map_err(singular)?;
                let g2m = solve_checked(
                    &(&eye - &(&csmp.s22 * &csmr.s11)),
                    &(&sa + &(&csmp.s22 * &sb)),
                )
                .map_err(singular)?;
                let al = scale(
                    &(&(&basis.bl0 * &g1) + &(&basis.al0 * &g2m)),
                    C64::new(0.5, 0.0),
                );

                // Amplitudes at the right interface of layer i.
                let next_vacuum = self.layer_is_vacuum(i + 1);
                let next = &self.layers[i + 1];
                let sa2 = &csm.s21 * &ai_v;
                let sb2 = if next.region == Region::Out && !next_vacuum {
                    let basis = next
                        .basis
                        .as_ref()
                        .ok_or_else(|| coherence("output interface factorization missing"))?;
                    basis.half_lu.solve(&bo_v)
                } else {
                    &csmrn.s12 * &bo_v
                };
                let f1 = solve_checked(
                    &(&eye - &(&csm.s22 * &csmrn.s11)),
                    &(&sa2 + &(&csm.s22 * &sb2)),
                )
                .map_err(singular)?;
                let f2 = solve_checked(
                    &(&eye - &(&csmrn.s11 * &csm.s22)),
                    &(&(&csmrn.s11 * &sa2) + &sb2),
                )
                .map_err(singular)?;
                let bl = scale(
                    &(&(&basis.bl0 * &f1) + &(&basis.al0 * &f2)),
                    C64::new(0.5, 0.0),
                );

                (first_col(&al), first_col(&bl))
            }
        };

        self.layers[i].al_bl = Some((al, bl));
        self.layers[i].need_recalc_al_bl = false;
        self.stats.back_solves += 1;
        Ok(())
    }

    /// Outgoing amplitudes from the global scattering matrix:
    /// `bi = S11 ai + S12 bo`, `ao = S21 ai + S22 bo`.
    pub(crate) fn calc_bi_ao(&mut self) {
        if !self.need_recalc_bi_ao {
            return;
        }
        let Some(sm) = self.sm.clone() else { return };
        let ai_v = col_mat(&self.pr.ai);
        let bo_v = col_mat(&self.pr.bo);
        self.bi = Some(first_col(&(&(&sm.s11 * &ai_v) + &(&sm.s12 * &bo_v))));
        self.ao = Some(first_col(&(&(&sm.s21 * &ai_v) + &(&sm.s22 * &bo_v))));
        self.need_recalc_bi_ao = false;
    }

    // --- Helpers ---

    /// Brings layer `i` to the `Solved` state: a fresh modal basis when the
    /// profile changed (copies borrow their source's), a fresh per-layer
    /// scattering matrix when basis or thickness changed.
    pub(crate) fn ensure_layer_solved(&mut self, i: usize) -> Result<(), SimError> {
        let needs_modal = self.layers[i].if_mod || self.layers[i].basis.is_none();
        if needs_modal {
            if let Some(src) = self.layers[i].copy_of {
                self.ensure_layer_solved(src)?;
                self.layers[i].basis = self.layers[src].basis.clone();
            } else {
                let lattice = self.pr.lattice().ok_or_else(|| {
                    coherence("modal solve requested before the lattice was set")
                })?;
                let pr = &self.pr;
                let materials = &self.materials;
                self.layers[i].solve_modal(pr, materials, lattice)?;
                self.stats.modal_solves += 1;
            }
            self.layers[i].al_bl = None;
        }
        if needs_modal || self.layers[i].if_t_change || self.layers[i].sm.is_none() {
            let is_vacuum = self.layer_is_vacuum(i);
            let pr = &self.pr;
            self.layers[i].solve_sm(pr, i, is_vacuum)?;
            self.stats.sm_builds += 1;
        }
        self.layers[i].if_mod = false;
        self.layers[i].if_t_change = false;
        Ok(())
    }

    /// Extends the partial product anchored at `anchor` until it ends at
    /// `target_end`, composing with the right-most cached children.
    fn extend_anchor_to(&mut self, anchor: usize, target_end: usize) -> Result<(), SimError> {
        loop {
            let last = self.csms[anchor]
                .last()
                .cloned()
                .ok_or_else(|| coherence("extension from an empty anchor"))?;
            if last.end >= target_end {
                return Ok(());
            }
            let child = self.csms[last.end + 1]
                .last()
                .cloned()
                .ok_or_else(|| coherence("gap between cached partial products"))?;
            let composed = self.star(&last.sm, &child.sm, (anchor, child.end))?;
            self.push_csms_entry(CsmEntry::new(anchor, child.end, Arc::new(composed)));
        }
    }

    /// Appends an entry to its anchor's list, keeping ends strictly
    /// increasing. A duplicate end is ignored (the cached product is
    /// already there).
    fn push_csms_entry(&mut self, entry: CsmEntry) {
        let list = &mut self.csms[entry.anchor];
        if let Some(last) = list.last() {
            debug_assert!(
                entry.end >= last.end,
                "cache entries must be appended in span order"
            );
            if entry.end <= last.end {
                return;
            }
        }
        list.push(entry);
    }

    fn star(
        &mut self,
        a: &Arc<SMatrix>,
        b: &Arc<SMatrix>,
        span: (usize, usize),
    ) -> Result<SMatrix, SimError> {
        self.stats.redheffer_products += 1;
        rsp(a, b).map_err(|_| SimError::NumericalSingularity { span })
    }

    fn star_in(
        &mut self,
        a: &Arc<SMatrix>,
        b: &Arc<SMatrix>,
        span: (usize, usize),
    ) -> Result<SMatrix, SimError> {
        self.stats.redheffer_products += 1;
        rsp_in(a, b).map_err(|_| SimError::NumericalSingularity { span })
    }

    fn star_out(
        &mut self,
        a: &Arc<SMatrix>,
        b: &Arc<SMatrix>,
        span: (usize, usize),
    ) -> Result<SMatrix, SimError> {
        self.stats.redheffer_products += 1;
        rsp_out(a, b).map_err(|_| SimError::NumericalSingularity { span })
    }
}

fn coherence(message: &str) -> SimError {
    SimError::CacheCoherence {
        message: message.to_string(),
    }
}
