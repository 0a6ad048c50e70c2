//! Calibración de probabilidades
//!
//! Los clasificadores de smartcore emiten etiquetas duras, no probabilidades.
//! La curva isotónica mapea esas salidas crudas a frecuencias empíricas
//! medidas sobre el held-out, y queda congelada dentro del artefacto.

use serde::{Deserialize, Serialize};

/// Curva de calibración (mapeo de raw -> calibrated)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CalibrationCurve {
    /// Puntos de la curva (raw_prob, calibrated_prob), ordenados por raw
    pub points: Vec<(f64, f64)>,
    /// Número de muestras usadas para calibrar
    pub n_samples: usize,
}

impl CalibrationCurve {
    /// Calibrar una probabilidad raw por interpolación lineal
    pub fn calibrate(&self, raw_prob: f64) -> f64 {
        if self.points.is_empty() {
            return raw_prob.clamp(0.01, 0.99);
        }

        let clamped = raw_prob.clamp(0.0, 1.0);

        for i in 0..self.points.len() - 1 {
            let (x1, y1) = self.points[i];
            let (x2, y2) = self.points[i + 1];

            if clamped >= x1 && clamped <= x2 {
                let t = if x2 > x1 { (clamped - x1) / (x2 - x1) } else { 0.0 };
                return (y1 + t * (y2 - y1)).clamp(0.01, 0.99);
            }
        }

        // Fuera de rango: extremo más cercano
        if clamped <= self.points[0].0 {
            self.points[0].1.clamp(0.01, 0.99)
        } else {
            match self.points.last() {
                Some(&(_, y)) => y.clamp(0.01, 0.99),
                None => clamped,
            }
        }
    }

    /// Ajustar la curva con regresión isotónica por bins
    pub fn fit_isotonic(&mut self, predictions: &[f64], outcomes: &[bool], n_bins: usize) {
        debug_assert_eq!(predictions.len(), outcomes.len());

        if predictions.is_empty() || n_bins == 0 {
            return;
        }

        let mut bins: Vec<Vec<bool>> = vec![Vec::new(); n_bins];
        for (pred, outcome) in predictions.iter().zip(outcomes.iter()) {
            let bin_idx = ((pred * n_bins as f64) as usize).min(n_bins - 1);
            bins[bin_idx].push(*outcome);
        }

        // Frecuencia real por bin ocupado
        self.points.clear();
        for (i, bin) in bins.iter().enumerate() {
            if !bin.is_empty() {
                let raw_prob = (i as f64 + 0.5) / n_bins as f64;
                let actual_prob = bin.iter().filter(|&&o| o).count() as f64 / bin.len() as f64;
                self.points.push((raw_prob, actual_prob));
            }
        }

        self.enforce_monotonicity();
        self.n_samples = predictions.len();
    }

    /// Forzar monotonicidad no decreciente (algoritmo PAVA)
    fn enforce_monotonicity(&mut self) {
        if self.points.len() < 2 {
            return;
        }

        let mut i = 0;
        while i < self.points.len() - 1 {
            if self.points[i].1 > self.points[i + 1].1 {
                // Violación encontrada: promediar adyacentes
                let avg = (self.points[i].1 + self.points[i + 1].1) / 2.0;
                self.points[i].1 = avg;
                self.points[i + 1].1 = avg;
                if i > 0 {
                    i -= 1;
                }
            } else {
                i += 1;
            }
        }
    }

    /// Expected Calibration Error sobre los puntos de la curva
    pub fn expected_calibration_error(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.points
            .iter()
            .map(|(raw, cal)| (raw - cal).abs())
            .sum::<f64>()
            / self.points.len() as f64
    }
}
