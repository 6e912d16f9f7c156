pub mod gpiomem;
