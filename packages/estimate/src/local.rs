//! k-nearest-neighbor local OLS fallback.
//!
//! Each cell gets its own unweighted least-squares fit over the `k`
//! centroids nearest to it, evaluated at the cell's own predictor
//! values. Cells are fitted independently, so the work parallelizes
//! across the pool.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use rstar::RTree;
use rstar::primitives::GeomWithData;

use crate::{CancelToken, EstimateError, ModelInput, SurfaceFit};

/// Rank tolerance for the singular value decomposition. Degenerate
/// neighborhoods (e.g. a zero-variance predictor) fall back to the
/// minimum-norm solution instead of failing.
const SVD_EPSILON: f64 = 1e-12;

pub(crate) fn fit_local_linear(
    input: &ModelInput,
    neighbors: usize,
    cancel: &CancelToken,
) -> Result<SurfaceFit, EstimateError> {
    let cell_count = input.len();
    let k = neighbors.min(cell_count);
    log::info!("Fitting local linear surface over {cell_count} cells with k = {k}");

    let tree = RTree::bulk_load(
        input
            .coords
            .iter()
            .enumerate()
            .map(|(index, &coord)| GeomWithData::new(coord, index))
            .collect(),
    );

    let predictor_count = input.predictors.ncols();
    let predictions = (0..cell_count)
        .into_par_iter()
        .map(|cell| {
            if cancel.is_cancelled() {
                return Err(EstimateError::Cancelled);
            }

            let neighborhood: Vec<usize> = tree
                .nearest_neighbor_iter(&input.coords[cell])
                .take(k)
                .map(|entry| entry.data)
                .collect();

            let mut design = DMatrix::zeros(neighborhood.len(), predictor_count + 1);
            let mut observed = DVector::zeros(neighborhood.len());
            for (row, &neighbor) in neighborhood.iter().enumerate() {
                design[(row, 0)] = 1.0;
                for column in 0..predictor_count {
                    design[(row, column + 1)] = input.predictors[(neighbor, column)];
                }
                observed[row] = input.response[neighbor];
            }

            let beta = design
                .svd(true, true)
                .solve(&observed, SVD_EPSILON)
                .map_err(|message| EstimateError::Solve {
                    message: message.to_string(),
                })?;

            let mut prediction = beta[0];
            for column in 0..predictor_count {
                prediction += beta[column + 1] * input.predictors[(cell, column)];
            }
            Ok((input.cell_ids[cell], prediction))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SurfaceFit::from_predictions(predictions))
}
