/// ROS from the model output: the models predict 5*log10(ROS + 1)
pub fn back_transform(prediction: f32) -> f32 {
    if prediction.is_nan() {
        return f32::NAN;
    }
    10.0_f32.powf(prediction / 5.0) - 1.0
}
