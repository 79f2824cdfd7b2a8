mod calibration;
mod instant_actions;
mod orders;
mod timeouts;
