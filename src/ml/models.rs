//! Modelos ML usando SmartCore
//!
//! Los clasificadores de SmartCore predicen etiquetas, no probabilidades,
//! así que cada mercado binario se entrena como candidatos uno-contra-resto
//! y la salida cruda pasa por la curva isotónica del held-out. El mercado
//! 1X2 son tres binarios OvR renormalizados.

use super::calibration::CalibrationCurve;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_classifier::{
    RandomForestClassifier, RandomForestClassifierParameters,
};
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::linear::linear_regression::{LinearRegression, LinearRegressionParameters};
use smartcore::linear::logistic_regression::{LogisticRegression, LogisticRegressionParameters};
use tracing::debug;

/// Clasificador entrenado de cualquiera de las familias candidatas
#[derive(Serialize, Deserialize)]
pub enum ClassifierModel {
    Forest(RandomForestClassifier<f64, i64, DenseMatrix<f64>, Vec<i64>>),
    Logistic(LogisticRegression<f64, i64, DenseMatrix<f64>, Vec<i64>>),
}

impl ClassifierModel {
    pub fn predict(&self, x: &DenseMatrix<f64>) -> Result<Vec<i64>> {
        match self {
            ClassifierModel::Forest(m) => {
                m.predict(x).map_err(|e| anyhow!("forest predict failed: {e}"))
            }
            ClassifierModel::Logistic(m) => {
                m.predict(x).map_err(|e| anyhow!("logistic predict failed: {e}"))
            }
        }
    }
}

impl std::fmt::Debug for ClassifierModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassifierModel::Forest(_) => write!(f, "ClassifierModel::Forest"),
            ClassifierModel::Logistic(_) => write!(f, "ClassifierModel::Logistic"),
        }
    }
}

/// Familia candidata de clasificadores: la selección por mercado se hace
/// por accuracy en el held-out. Nuevas familias se enchufan implementando
/// este trait.
pub trait EstimatorFamily: Send + Sync {
    fn name(&self) -> &'static str;
    fn fit(&self, x: &DenseMatrix<f64>, y: &Vec<i64>) -> Result<ClassifierModel>;
}

/// Random Forest profundo (captura interacciones entre features)
pub struct RandomForestFamily {
    pub n_trees: u16,
    pub max_depth: u16,
}

impl EstimatorFamily for RandomForestFamily {
    fn name(&self) -> &'static str {
        "RandomForest"
    }

    fn fit(&self, x: &DenseMatrix<f64>, y: &Vec<i64>) -> Result<ClassifierModel> {
        let params = RandomForestClassifierParameters::default()
            .with_n_trees(self.n_trees)
            .with_max_depth(self.max_depth)
            .with_min_samples_split(5);
        RandomForestClassifier::fit(x, y, params)
            .map(ClassifierModel::Forest)
            .map_err(|e| anyhow!("Random Forest training failed: {:?}", e))
    }
}

/// Bosque superficial con muchos árboles pequeños: menos varianza en
/// datasets medianos
pub struct ShallowForestFamily {
    pub n_trees: u16,
}

impl EstimatorFamily for ShallowForestFamily {
    fn name(&self) -> &'static str {
        "ShallowForest"
    }

    fn fit(&self, x: &DenseMatrix<f64>, y: &Vec<i64>) -> Result<ClassifierModel> {
        let params = RandomForestClassifierParameters::default()
            .with_n_trees(self.n_trees)
            .with_max_depth(6)
            .with_min_samples_split(10);
        RandomForestClassifier::fit(x, y, params)
            .map(ClassifierModel::Forest)
            .map_err(|e| anyhow!("Shallow forest training failed: {:?}", e))
    }
}

/// Regresión logística como candidato lineal de referencia
pub struct LogisticFamily;

impl EstimatorFamily for LogisticFamily {
    fn name(&self) -> &'static str {
        "LogisticRegression"
    }

    fn fit(&self, x: &DenseMatrix<f64>, y: &Vec<i64>) -> Result<ClassifierModel> {
        LogisticRegression::fit(x, y, LogisticRegressionParameters::default())
            .map(ClassifierModel::Logistic)
            .map_err(|e| anyhow!("Logistic regression training failed: {:?}", e))
    }
}

/// Accuracy simple sobre etiquetas
pub fn accuracy(predictions: &[i64], actual: &[i64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let correct = predictions
        .iter()
        .zip(actual.iter())
        .filter(|(p, a)| p == a)
        .count();
    correct as f64 / actual.len() as f64
}

/// Binario calibrado de un mercado: mejor candidato + curva isotónica
#[derive(Debug, Serialize, Deserialize)]
pub struct CalibratedBinary {
    pub market: String,
    pub family: String,
    pub model: ClassifierModel,
    pub calibration: CalibrationCurve,
    pub validation_accuracy: f64,
    pub n_train: usize,
}

impl CalibratedBinary {
    /// Entrena todos los candidatos, se queda con el de mejor accuracy en
    /// el held-out y calibra su salida cruda contra los resultados reales.
    pub fn train(
        market: &str,
        x_train: &DenseMatrix<f64>,
        y_train: &Vec<i64>,
        x_test: &DenseMatrix<f64>,
        y_test: &Vec<i64>,
        calibration_bins: usize,
        candidates: &[Box<dyn EstimatorFamily>],
    ) -> Result<Self> {
        let mut best: Option<(ClassifierModel, &'static str, f64, Vec<i64>)> = None;
        for family in candidates {
            let model = family.fit(x_train, y_train)?;
            let predictions = model.predict(x_test)?;
            let acc = accuracy(&predictions, y_test);
            debug!("  {} [{}]: accuracy {:.3}", market, family.name(), acc);
            match &best {
                Some((_, _, best_acc, _)) if *best_acc >= acc => {}
                _ => best = Some((model, family.name(), acc, predictions)),
            }
        }

        let (model, family, validation_accuracy, test_predictions) =
            best.ok_or_else(|| anyhow!("no candidate families for market {market}"))?;

        let raw: Vec<f64> = test_predictions.iter().map(|&p| p as f64).collect();
        let outcomes: Vec<bool> = y_test.iter().map(|&y| y == 1).collect();
        let mut calibration = CalibrationCurve::default();
        calibration.fit_isotonic(&raw, &outcomes, calibration_bins);

        Ok(Self {
            market: market.to_string(),
            family: family.to_string(),
            model,
            calibration,
            validation_accuracy,
            n_train: y_train.len(),
        })
    }

    /// Probabilidad calibrada para una fila de features
    pub fn predict_prob(&self, row: &DenseMatrix<f64>) -> Result<f64> {
        let predictions = self.model.predict(row)?;
        let raw = predictions.first().copied().unwrap_or(0) as f64;
        Ok(self.calibration.calibrate(raw))
    }
}

/// Modelo 1X2: tres binarios uno-contra-resto renormalizados
#[derive(Debug, Serialize, Deserialize)]
pub struct ResultModel {
    pub home: CalibratedBinary,
    pub draw: CalibratedBinary,
    pub away: CalibratedBinary,
    /// Accuracy multiclase por argmax en el held-out
    pub validation_accuracy: f64,
}

impl ResultModel {
    /// Probabilidades (local, empate, visitante) normalizadas a 1
    pub fn predict_probs(&self, row: &DenseMatrix<f64>) -> Result<(f64, f64, f64)> {
        let h = self.home.predict_prob(row)?;
        let d = self.draw.predict_prob(row)?;
        let a = self.away.predict_prob(row)?;
        let total = h + d + a;
        if total > 0.0 {
            Ok((h / total, d / total, a / total))
        } else {
            Ok((1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0))
        }
    }
}

/// Regresor entrenado para mercados de conteo
#[derive(Serialize, Deserialize)]
pub enum RegressorModel {
    Forest(RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>),
    Linear(LinearRegression<f64, f64, DenseMatrix<f64>, Vec<f64>>),
}

impl RegressorModel {
    pub fn predict(&self, x: &DenseMatrix<f64>) -> Result<Vec<f64>> {
        match self {
            RegressorModel::Forest(m) => {
                m.predict(x).map_err(|e| anyhow!("forest regressor predict failed: {e}"))
            }
            RegressorModel::Linear(m) => {
                m.predict(x).map_err(|e| anyhow!("linear regressor predict failed: {e}"))
            }
        }
    }
}

impl std::fmt::Debug for RegressorModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegressorModel::Forest(_) => write!(f, "RegressorModel::Forest"),
            RegressorModel::Linear(_) => write!(f, "RegressorModel::Linear"),
        }
    }
}

/// R² de una predicción de regresión
pub fn r_squared(predictions: &[f64], actual: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let ss_tot: f64 = actual.iter().map(|y| (y - mean).powi(2)).sum();
    let ss_res: f64 = predictions
        .iter()
        .zip(actual.iter())
        .map(|(p, y)| (y - p).powi(2))
        .sum();
    if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else {
        0.0
    }
}

/// Error absoluto medio
pub fn mean_absolute_error(predictions: &[f64], actual: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    predictions
        .iter()
        .zip(actual.iter())
        .map(|(p, y)| (p - y).abs())
        .sum::<f64>()
        / actual.len() as f64
}

/// Regresor calibrado por selección de candidatos (forest vs lineal por R²)
#[derive(Debug, Serialize, Deserialize)]
pub struct CountModel {
    pub market: String,
    pub family: String,
    pub model: RegressorModel,
    pub validation_r2: f64,
    pub validation_mae: f64,
    pub n_train: usize,
}

impl CountModel {
    pub fn train(
        market: &str,
        x_train: &DenseMatrix<f64>,
        y_train: &Vec<f64>,
        x_test: &DenseMatrix<f64>,
        y_test: &Vec<f64>,
    ) -> Result<Self> {
        let forest_params = RandomForestRegressorParameters::default()
            .with_n_trees(200)
            .with_max_depth(12);
        let forest = RandomForestRegressor::fit(x_train, y_train, forest_params)
            .map(RegressorModel::Forest)
            .map_err(|e| anyhow!("Forest regressor training failed: {:?}", e))?;
        let linear = LinearRegression::fit(x_train, y_train, LinearRegressionParameters::default())
            .map(RegressorModel::Linear)
            .map_err(|e| anyhow!("Linear regressor training failed: {:?}", e))?;

        let mut best: Option<(RegressorModel, &'static str, f64, f64)> = None;
        for (model, name) in [(forest, "ForestRegressor"), (linear, "LinearRegression")] {
            let predictions = model.predict(x_test)?;
            let r2 = r_squared(&predictions, y_test);
            let mae = mean_absolute_error(&predictions, y_test);
            debug!("  {} [{}]: R2 {:.3}, MAE {:.2}", market, name, r2, mae);
            match &best {
                Some((_, _, best_r2, _)) if *best_r2 >= r2 => {}
                _ => best = Some((model, name, r2, mae)),
            }
        }

        let (model, family, validation_r2, validation_mae) =
            best.ok_or_else(|| anyhow!("no regressor candidates for market {market}"))?;

        Ok(Self {
            market: market.to_string(),
            family: family.to_string(),
            model,
            validation_r2,
            validation_mae,
            n_train: y_train.len(),
        })
    }

    pub fn predict_value(&self, row: &DenseMatrix<f64>) -> Result<f64> {
        let predictions = self.model.predict(row)?;
        Ok(predictions.first().copied().unwrap_or(0.0).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy_metric() {
        assert_eq!(accuracy(&[1, 0, 1, 1], &[1, 0, 0, 1]), 0.75);
        assert_eq!(accuracy(&[], &[]), 0.0);
    }

    #[test]
    fn test_r_squared_perfect_and_mean() {
        let actual = vec![1.0, 2.0, 3.0, 4.0];
        assert!((r_squared(&actual, &actual) - 1.0).abs() < 1e-12);
        let mean_pred = vec![2.5; 4];
        assert!(r_squared(&mean_pred, &actual).abs() < 1e-12);
    }

    #[test]
    fn test_mae() {
        let predictions = vec![1.0, 3.0];
        let actual = vec![2.0, 1.0];
        assert!((mean_absolute_error(&predictions, &actual) - 1.5).abs() < 1e-12);
    }

    fn separable_data(n: usize) -> (Vec<Vec<f64>>, Vec<i64>) {
        // Dos nubes separables en la primera coordenada
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..n {
            let positive = i % 2 == 0;
            let base = if positive { 5.0 } else { -5.0 };
            x.push(vec![base + (i % 7) as f64 * 0.1, (i % 3) as f64]);
            y.push(if positive { 1 } else { 0 });
        }
        (x, y)
    }

    #[test]
    fn test_calibrated_binary_learns_separable_problem() {
        let (x, y) = separable_data(80);
        let rows: Vec<&[f64]> = x.iter().map(|v| v.as_slice()).collect();
        let matrix = DenseMatrix::from_2d_array(&rows).unwrap();

        let candidates: Vec<Box<dyn EstimatorFamily>> = vec![
            Box::new(RandomForestFamily { n_trees: 20, max_depth: 4 }),
            Box::new(LogisticFamily),
        ];
        let binary = CalibratedBinary::train(
            "over_25",
            &matrix,
            &y,
            &matrix,
            &y,
            10,
            &candidates,
        )
        .unwrap();

        assert!(binary.validation_accuracy > 0.9);

        let pos_row = DenseMatrix::from_2d_array(&[&[5.0, 1.0][..]]).unwrap();
        let neg_row = DenseMatrix::from_2d_array(&[&[-5.0, 1.0][..]]).unwrap();
        let p_pos = binary.predict_prob(&pos_row).unwrap();
        let p_neg = binary.predict_prob(&neg_row).unwrap();
        assert!(p_pos > p_neg);
        assert!(p_pos <= 0.99 && p_neg >= 0.01);
    }

    #[test]
    fn test_count_model_fits_linear_relation() {
        // y = 2*x0 + 1, el candidato lineal debe clavarlo
        let x: Vec<Vec<f64>> = (0..60).map(|i| vec![i as f64, (i % 5) as f64]).collect();
        let y: Vec<f64> = x.iter().map(|row| 2.0 * row[0] + 1.0).collect();
        let rows: Vec<&[f64]> = x.iter().map(|v| v.as_slice()).collect();
        let matrix = DenseMatrix::from_2d_array(&rows).unwrap();

        let model = CountModel::train("total_corners", &matrix, &y, &matrix, &y).unwrap();
        assert!(model.validation_r2 > 0.95);

        let row = DenseMatrix::from_2d_array(&[&[10.0, 0.0][..]]).unwrap();
        let pred = model.predict_value(&row).unwrap();
        assert!((pred - 21.0).abs() < 3.0);
    }
}
